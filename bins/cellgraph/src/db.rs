use std::path::{Path, PathBuf};

use anyhow::Context;
use cellgraph_db::backend::CellBackend;
use cellgraph_db::codec::schema::{Family, EXTENDED_ROW_PREFIX};
use cellgraph_db::codec::{qualifier, split_sequence, Codec};
use cellgraph_db::rocksdb::StorageMode;
use cellgraph_db::store::{Cell, CellStore, RocksCellStore};
use cellgraph_db::{
    Authorizations, Direction, ElementKey, ElementType, Graph, GraphConfig, Property,
    ReadOptions, Timestamp, Vertex,
};
use clap::{Args as ClapArgs, Subcommand, ValueEnum};

#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

type RocksGraph = Graph<CellBackend<RocksCellStore>>;

#[derive(Debug, ClapArgs)]
pub struct Command {
    /// Path to the RocksDB database directory
    #[clap(long, short = 'p')]
    pub path: PathBuf,

    /// Graph configuration JSON; must match the one the store was written with
    #[clap(long)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub verb: Verb,
}

#[derive(Debug, Subcommand)]
pub enum Verb {
    /// Print graph metadata
    Info,
    /// Dump raw cells
    Dump(Dump),
    /// Materialize a vertex
    Vertex(Read),
    /// Materialize an edge
    Edge(Read),
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum RowKind {
    Vertex,
    Edge,
    Extended,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug, Default)]
pub enum OutputFormat {
    /// Tab-separated values
    Tsv,
    /// Aligned columns (default)
    #[default]
    Table,
}

#[derive(Debug, ClapArgs)]
pub struct Dump {
    /// Row kind to dump
    #[clap(value_enum)]
    pub kind: RowKind,

    /// Element id; all rows of the kind when omitted
    #[clap(long)]
    pub id: Option<String>,

    /// Element type owning the extended rows (with --id)
    #[clap(long, value_enum, default_value = "vertex")]
    pub owner: RowKind,

    /// Maximum number of cells
    #[clap(long, default_value = "100")]
    pub limit: usize,

    #[clap(long, short = 'f', value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Debug, ClapArgs)]
pub struct Read {
    /// Element id
    pub id: String,

    /// Comma-separated authorization labels
    #[clap(long, short = 'a', default_value = "")]
    pub auths: String,

    /// Read the element as of this timestamp
    #[clap(long)]
    pub as_of: Option<u64>,

    /// Include hidden elements and properties readable under the authorizations
    #[clap(long)]
    pub include_hidden: bool,
}

impl Read {
    fn options(&self) -> ReadOptions {
        let options = ReadOptions::new(Authorizations::from_csv(&self.auths))
            .include_hidden(self.include_hidden);
        match self.as_of {
            Some(ts) => options.as_of(Timestamp(ts)),
            None => options,
        }
    }
}

pub fn run(cmd: &Command) {
    trace!("Running command: {:?}", cmd);

    if let Err(e) = execute(cmd) {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}

fn execute(cmd: &Command) -> anyhow::Result<()> {
    let graph = open(&cmd.path, cmd.config.as_deref())?;
    match &cmd.verb {
        Verb::Info => run_info(&graph),
        Verb::Dump(args) => run_dump(&graph, args),
        Verb::Vertex(args) => run_vertex(&graph, args),
        Verb::Edge(args) => run_edge(&graph, args),
    }
}

fn open(path: &Path, config: Option<&Path>) -> anyhow::Result<RocksGraph> {
    let config = match config {
        Some(file) => GraphConfig::from_file(file)?,
        None => GraphConfig::default(),
    };
    Graph::open_rocksdb(path, StorageMode::ReadOnly, config)
        .with_context(|| format!("opening graph at {}", path.display()))
}

fn run_info(graph: &RocksGraph) -> anyhow::Result<()> {
    let metadata = graph.metadata()?;
    for (key, value) in &metadata.entries {
        println!("{}\t{}", key, value);
    }
    println!("names\t{}", metadata.name_count);
    Ok(())
}

fn dump_prefix(args: &Dump) -> anyhow::Result<Vec<u8>> {
    let element_type = |kind: RowKind| match kind {
        RowKind::Edge => ElementType::Edge,
        _ => ElementType::Vertex,
    };
    Ok(match (args.kind, &args.id) {
        (RowKind::Extended, Some(id)) => {
            if args.owner == RowKind::Extended {
                anyhow::bail!("--owner must be vertex or edge");
            }
            let owner = ElementKey {
                element_type: element_type(args.owner),
                id: id.as_str().into(),
            };
            Codec::extended_row_prefix(&owner, None)
        }
        (RowKind::Extended, None) => vec![EXTENDED_ROW_PREFIX],
        (kind, Some(id)) => Codec::element_row(&ElementKey {
            element_type: element_type(kind),
            id: id.as_str().into(),
        }),
        (kind, None) => vec![element_type(kind).row_prefix()],
    })
}

fn run_dump(graph: &RocksGraph, args: &Dump) -> anyhow::Result<()> {
    let prefix = dump_prefix(args)?;
    let backend = graph.backend();
    let cells = backend.store().scan_prefix(&prefix, args.limit)?;
    debug!(cells = cells.len(), "Dumping cells");

    let rows: Vec<[String; 7]> = cells.iter().map(|cell| describe(backend.codec(), cell)).collect();
    let header = ["ROW", "FAMILY", "QUALIFIER", "VISIBILITY", "TIMESTAMP", "SEQ", "VALUE_BYTES"]
        .map(String::from);
    match args.format {
        OutputFormat::Tsv => {
            for row in &rows {
                println!("{}", row.join("\t"));
            }
        }
        OutputFormat::Table => print_table(&header, &rows),
    }
    Ok(())
}

/// Render one cell with qualifier tokens inflated back to names.
fn describe(codec: &Codec, cell: &Cell) -> [String; 7] {
    let family = Family::from_bytes(&cell.key.family)
        .map(|f| f.name().to_string())
        .unwrap_or_else(|_| String::from_utf8_lossy(&cell.key.family).into_owned());
    let qualifier = match qualifier::split(&cell.key.qualifier) {
        Ok(tokens) => tokens
            .iter()
            .map(|t| {
                codec
                    .names()
                    .inflate(t)
                    .unwrap_or_else(|_| String::from_utf8_lossy(t).into_owned())
            })
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => String::from_utf8_lossy(&cell.key.qualifier).into_owned(),
    };
    let (seq, payload) = match split_sequence(&cell.value) {
        Ok((seq, payload)) => (seq.to_string(), payload.len()),
        Err(_) => ("?".to_string(), cell.value.len()),
    };
    [
        String::from_utf8_lossy(&cell.key.row).replace('\0', "/"),
        family,
        qualifier,
        String::from_utf8_lossy(&cell.key.visibility).into_owned(),
        cell.key.timestamp.to_string(),
        seq,
        payload.to_string(),
    ]
}

fn print_table(header: &[String; 7], rows: &[[String; 7]]) {
    let mut widths = header.clone().map(|h| h.len());
    for row in rows {
        for (width, field) in widths.iter_mut().zip(row) {
            *width = (*width).max(field.len());
        }
    }
    let line = |fields: &[String; 7]| {
        fields
            .iter()
            .zip(&widths)
            .map(|(f, w)| format!("{:<width$}", f, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
    };
    println!("{}", line(header));
    for row in rows {
        println!("{}", line(row));
    }
}

fn print_properties(properties: &[Property]) -> anyhow::Result<()> {
    for p in properties {
        let hidden = if p.is_hidden() { " (hidden)" } else { "" };
        println!(
            "  {}:{} [{}] @{} = {}{}",
            p.key,
            p.name,
            p.visibility,
            p.timestamp,
            p.value()?,
            hidden
        );
        for m in &p.metadata {
            println!("    {} [{}] = {}", m.key, m.visibility, m.value.resolve()?);
        }
    }
    Ok(())
}

fn print_edges(vertex: &Vertex) -> anyhow::Result<()> {
    for info in vertex.edge_infos(Direction::Both)? {
        let arrow = match info.direction {
            Direction::In => "<-",
            _ => "->",
        };
        println!(
            "  {} {} {} [{}] {}",
            arrow, info.label, info.other_vertex_id, info.visibility, info.edge_id
        );
    }
    Ok(())
}

fn run_vertex(graph: &RocksGraph, args: &Read) -> anyhow::Result<()> {
    let Some(vertex) = graph.get_vertex(&args.id.as_str().into(), &args.options())? else {
        println!("vertex {} not found", args.id);
        return Ok(());
    };
    println!("vertex {} [{}] @{}", vertex.id(), vertex.visibility(), vertex.timestamp());
    println!("properties:");
    print_properties(vertex.properties()?)?;
    println!("edges:");
    print_edges(&vertex)?;
    let tables = vertex.extended_table_names()?;
    if !tables.is_empty() {
        println!(
            "extended tables: {}",
            tables.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    Ok(())
}

fn run_edge(graph: &RocksGraph, args: &Read) -> anyhow::Result<()> {
    let Some(edge) = graph.get_edge(&args.id.as_str().into(), &args.options())? else {
        println!("edge {} not found", args.id);
        return Ok(());
    };
    println!(
        "edge {} [{}] @{}: {} -{}-> {}",
        edge.id(),
        edge.visibility(),
        edge.timestamp(),
        edge.out_vertex_id(),
        edge.label(),
        edge.in_vertex_id()
    );
    println!("properties:");
    print_properties(edge.properties()?)
}
