//! Ordered collection of [`TicketRecord`]s, parallel to the vector index.
//!
//! Insertion order is fetch order. Keys are unique; the catalog is the
//! source of truth for display and filter metadata.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DedupError, Result};
use crate::models::TicketRecord;

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    records: Vec<Arc<TicketRecord>>,
    by_key: HashMap<String, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from records, failing on the first duplicate key.
    pub fn from_records(records: impl IntoIterator<Item = TicketRecord>) -> Result<Self> {
        let mut catalog = Self::new();
        for record in records {
            catalog.push(record)?;
        }
        Ok(catalog)
    }

    /// Append a record. Returns the shared handle stored in the catalog.
    pub fn push(&mut self, record: TicketRecord) -> Result<Arc<TicketRecord>> {
        if self.by_key.contains_key(&record.key) {
            return Err(DedupError::Validation(format!(
                "duplicate ticket key in catalog: {}",
                record.key
            )));
        }
        let record = Arc::new(record);
        self.by_key.insert(record.key.clone(), self.records.len());
        self.records.push(record.clone());
        Ok(record)
    }

    pub fn get(&self, key: &str) -> Option<&Arc<TicketRecord>> {
        self.by_key.get(key).map(|&i| &self.records[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TicketRecord>> {
        self.records.iter()
    }

    pub fn records(&self) -> &[Arc<TicketRecord>] {
        &self.records
    }
}
