//! Country name reference table
//!
//! The provider's country list only carries Turkish names. English and
//! native names come from a static JSON table loaded once at startup:
//!
//! ```json
//! { "countries": { "2": { "name": "Turkey", "nativeName": "Türkiye" } } }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Errors, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NameEntry {
    name: Option<String>,
    native_name: Option<String>,
}

/// Immutable id → names mapping
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NameTable {
    #[serde(default)]
    countries: HashMap<i64, NameEntry>,
}

impl NameTable {
    /// Load the table from `path`, or an empty table when no path is set
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path).map_err(|e| {
            Errors::invalid_input(format!("cannot read name table: {e}"))
                .with_context("path", path.display())
        })?;
        let table = Self::from_json(&raw).map_err(|e| e.with_context("path", path.display()))?;

        tracing::info!(
            path = %path.display(),
            countries = table.countries.len(),
            "Name table loaded"
        );
        Ok(table)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// English and native names of a country, falling back to the Turkish name
    pub fn country_names(&self, id: i64, tr_name: &str) -> (String, String) {
        let entry = self.countries.get(&id);
        let pick = |value: Option<&String>| match value {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => tr_name.to_string(),
        };

        (
            pick(entry.and_then(|e| e.name.as_ref())),
            pick(entry.and_then(|e| e.native_name.as_ref())),
        )
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }
}
