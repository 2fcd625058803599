//! Timeline persistence.
//!
//! A [`Backend`] stores element and extended-row timelines. Both implementations
//! feed the same reconstruction code, so they answer every read identically:
//!
//! - [`MemoryBackend`]: timelines held directly, appended copy-on-write
//! - [`CellBackend`]: timelines encoded into sorted cells of a [`CellStore`](crate::store::CellStore)

mod cells;
mod memory;
mod retry;

pub use cells::CellBackend;
pub use memory::MemoryBackend;

pub(crate) use retry::with_retry;

use crate::error::Result;
use crate::id::{ElementId, ElementKey, ElementType, ExtendedRowKey};
use crate::mutation::{ExtendedDataMutation, Mutation};
use crate::timeline::Timeline;

pub trait Backend: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Encoding identities that must match on reopen, as (metadata key, id).
    fn identity(&self) -> Vec<(&'static str, &'static str)> {
        Vec::new()
    }

    /// Append mutations to an element's timeline, creating it if absent.
    fn append(&self, key: &ElementKey, mutations: Vec<Mutation>) -> Result<()>;

    /// A snapshot of the element's timeline.
    fn load(&self, key: &ElementKey) -> Result<Option<Timeline<Mutation>>>;

    /// `load` for several elements; results are positional.
    fn load_many(&self, keys: &[ElementKey]) -> Result<Vec<Option<Timeline<Mutation>>>> {
        keys.iter().map(|key| self.load(key)).collect()
    }

    /// Remove the element's timeline and all of its extended data rows.
    fn purge(&self, key: &ElementKey) -> Result<()>;

    /// Ids of every stored element of one type, ordered.
    fn element_ids(&self, element_type: ElementType) -> Result<Vec<ElementId>>;

    fn append_row(&self, key: &ExtendedRowKey, mutations: Vec<ExtendedDataMutation>) -> Result<()>;

    fn load_row(&self, key: &ExtendedRowKey) -> Result<Option<Timeline<ExtendedDataMutation>>>;

    /// Row ids of one extended data table of an element, ordered.
    fn row_ids(&self, element: &ElementKey, table: &str) -> Result<Vec<String>>;

    fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put_metadata(&self, entries: &[(String, Vec<u8>)]) -> Result<()>;

    /// Metadata entries whose key starts with `prefix`, ordered by key.
    fn metadata_entries(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}
