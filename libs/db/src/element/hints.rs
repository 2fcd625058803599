/// Which parts of an element a read loads. Accessing an unloaded part is a
/// `MissingFetchHint` error rather than an empty answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchHints {
    pub properties: bool,
    pub edge_refs: bool,
    pub extended_table_names: bool,
    pub include_hidden: bool,
}

impl FetchHints {
    pub const ALL: FetchHints = FetchHints {
        properties: true,
        edge_refs: true,
        extended_table_names: true,
        include_hidden: false,
    };

    pub const ALL_INCLUDING_HIDDEN: FetchHints = FetchHints {
        include_hidden: true,
        ..FetchHints::ALL
    };

    pub const NONE: FetchHints = FetchHints {
        properties: false,
        edge_refs: false,
        extended_table_names: false,
        include_hidden: false,
    };

    pub const EDGE_REFS: FetchHints = FetchHints {
        edge_refs: true,
        ..FetchHints::NONE
    };

    pub fn with_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }
}

impl Default for FetchHints {
    fn default() -> Self {
        FetchHints::ALL
    }
}
