//! Display names for location identifiers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Lookup from location identifier to a human-readable name.
pub trait LocationNames: Send + Sync {
    fn display_name(&self, location_id: &str) -> String;
}

/// Refreshable name table, replaced wholesale on refresh.
///
/// Unknown identifiers render as `Map_<first 8 chars>`.
#[derive(Debug, Default)]
pub struct NameCache {
    names: RwLock<Arc<HashMap<String, String>>>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let cache = Self::new();
        cache.replace(entries);
        cache
    }

    /// Swap in a new table.
    pub fn replace<I, K, V>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let table: HashMap<String, String> =
            entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        *self.names.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
    }

    /// Current table, sorted by identifier.
    pub fn entries(&self) -> Vec<(String, String)> {
        let table = Arc::clone(&self.names.read().unwrap_or_else(PoisonError::into_inner));
        let mut entries: Vec<_> = table.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        entries.sort();
        entries
    }
}

impl LocationNames for NameCache {
    fn display_name(&self, location_id: &str) -> String {
        let table = Arc::clone(&self.names.read().unwrap_or_else(PoisonError::into_inner));
        match table.get(location_id) {
            Some(name) => name.clone(),
            None => fallback_name(location_id),
        }
    }
}

fn fallback_name(location_id: &str) -> String {
    let short: String = location_id.chars().take(8).collect();
    format!("Map_{short}")
}
