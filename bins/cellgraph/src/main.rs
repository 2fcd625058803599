use clap::{Parser, Subcommand};

mod db;

#[derive(Parser)]
#[clap(author, version, about = "cellgraph CLI utility")]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Graph store inspection commands
    Db(db::Command),
}

fn main() {
    cellgraph_core::telemetry::init_dev_subscriber_with_env_filter();

    let cli = Cli::parse();

    tracing::debug!("starting");

    match cli.command {
        Commands::Db(args) => db::run(&args),
    }
}
