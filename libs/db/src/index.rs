//! Secondary search index collaborator.
//!
//! The graph writes first and indexes second: an index failure is reported
//! in the [`SaveReport`](crate::graph::SaveReport) and never undoes the write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::element::Element;
use crate::id::ElementKey;
use crate::mutation::PropertyIdentity;
use crate::visibility::Authorizations;

pub trait SearchIndex: Send + Sync {
    /// Module name for logging.
    fn name(&self) -> &'static str;

    /// Full reindex of one element as seen by `authorizations`.
    fn add_element(&self, element: &Element, authorizations: &Authorizations) -> Result<()>;

    fn delete_property(
        &self,
        element: &ElementKey,
        property: &PropertyIdentity,
        authorizations: &Authorizations,
    ) -> Result<()>;

    fn delete_element(&self, element: &ElementKey, authorizations: &Authorizations) -> Result<()>;
}

/// Index that accepts everything and stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSearchIndex;

impl SearchIndex for NoopSearchIndex {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn add_element(&self, _element: &Element, _authorizations: &Authorizations) -> Result<()> {
        Ok(())
    }

    fn delete_property(
        &self,
        _element: &ElementKey,
        _property: &PropertyIdentity,
        _authorizations: &Authorizations,
    ) -> Result<()> {
        Ok(())
    }

    fn delete_element(&self, _element: &ElementKey, _authorizations: &Authorizations) -> Result<()> {
        Ok(())
    }
}

/// What a [`RecordingSearchIndex`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    AddElement {
        element: ElementKey,
        property_names: Vec<String>,
    },
    DeleteProperty {
        element: ElementKey,
        property: PropertyIdentity,
    },
    DeleteElement {
        element: ElementKey,
    },
}

/// In-memory index that records every call, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingSearchIndex {
    events: Mutex<Vec<IndexEvent>>,
    failing: AtomicBool,
}

impl RecordingSearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails without recording.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<IndexEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn record(&self, event: IndexEvent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("search index unavailable"));
        }
        self.events
            .lock()
            .map_err(|_| anyhow!("recording index lock poisoned"))?
            .push(event);
        Ok(())
    }
}

impl SearchIndex for RecordingSearchIndex {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn add_element(&self, element: &Element, _authorizations: &Authorizations) -> Result<()> {
        let property_names = match element.properties() {
            Ok(properties) => properties.iter().map(|p| p.name.clone()).collect(),
            Err(_) => Vec::new(),
        };
        self.record(IndexEvent::AddElement {
            element: element.key(),
            property_names,
        })
    }

    fn delete_property(
        &self,
        element: &ElementKey,
        property: &PropertyIdentity,
        _authorizations: &Authorizations,
    ) -> Result<()> {
        self.record(IndexEvent::DeleteProperty {
            element: element.clone(),
            property: property.clone(),
        })
    }

    fn delete_element(&self, element: &ElementKey, _authorizations: &Authorizations) -> Result<()> {
        self.record(IndexEvent::DeleteElement {
            element: element.clone(),
        })
    }
}
