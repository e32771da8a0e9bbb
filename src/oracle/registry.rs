//! Source registry - configured sources and their adapters

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{OracleError, Result};
use crate::oracle::sources::SourceAdapter;
use crate::types::{PriceSource, SourceKind};

/// Registered source paired with the connector that serves it
#[derive(Clone)]
pub struct RegisteredSource {
    pub source: PriceSource,
    pub adapter: Arc<dyn SourceAdapter>,
}

impl std::fmt::Debug for RegisteredSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredSource")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Read-mostly set of price sources
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: RwLock<HashMap<String, RegisteredSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new source; fails if the id is taken
    pub fn register(&self, source: PriceSource, adapter: Arc<dyn SourceAdapter>) -> Result<()> {
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        if sources.contains_key(&source.id) {
            return Err(OracleError::DuplicateSource(source.id));
        }
        tracing::info!(
            source = %source.id,
            kind = %source.kind,
            weight = %source.weight,
            reliability = %source.reliability,
            "Registered price source"
        );
        sources.insert(source.id.clone(), RegisteredSource { source, adapter });
        Ok(())
    }

    /// Replace the static parameters of an existing source, keeping its adapter
    pub fn reregister(&self, source: PriceSource) -> Result<()> {
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        let entry = sources
            .get_mut(&source.id)
            .ok_or_else(|| OracleError::UnknownSource(source.id.clone()))?;
        tracing::info!(source = %source.id, "Re-registered price source");
        entry.source = source;
        Ok(())
    }

    pub fn deregister(&self, id: &str) -> Result<PriceSource> {
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        sources
            .remove(id)
            .map(|r| r.source)
            .ok_or_else(|| OracleError::UnknownSource(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Result<PriceSource> {
        self.sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|r| r.source.clone())
            .ok_or_else(|| OracleError::UnknownSource(id.to_string()))
    }

    /// All sources, optionally filtered by kind, ordered by id
    pub fn list(&self, kind: Option<SourceKind>) -> Vec<PriceSource> {
        let mut out: Vec<PriceSource> = self
            .sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| kind.map_or(true, |k| r.source.kind == k))
            .map(|r| r.source.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Snapshot of sources with adapters for one fetch cycle
    pub fn snapshot(&self) -> Vec<RegisteredSource> {
        let mut out: Vec<RegisteredSource> = self
            .sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        out.sort_by(|a, b| a.source.id.cmp(&b.source.id));
        out
    }

    pub fn len(&self) -> usize {
        self.sources.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
