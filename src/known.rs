use std::collections::BTreeMap;

use crate::domain::{AccessionId, ResolutionResult};

/// Curated accession → result pairs consulted before any network call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownMappings {
    entries: BTreeMap<String, ResolutionResult>,
}

impl KnownMappings {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Mappings confirmed against the archives by hand.
    pub fn builtin() -> Self {
        let mut known = Self::empty();
        known.insert("ERP127673", ResolutionResult::new("PRJEB43688", "E-MTAB-10220"));
        known.insert("SRP324458", ResolutionResult::new("PRJNA738600", "GSE178360"));
        known
    }

    pub fn insert(&mut self, accession: &str, result: ResolutionResult) {
        self.entries
            .insert(accession.trim().to_uppercase(), result);
    }

    pub fn extend<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (String, ResolutionResult)>,
    {
        for (accession, result) in entries {
            self.insert(&accession, result);
        }
    }

    pub fn get(&self, id: &AccessionId) -> Option<&ResolutionResult> {
        self.entries.get(id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
