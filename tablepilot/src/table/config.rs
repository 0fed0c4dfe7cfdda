//! Table configuration and the roster file.

use crate::{
    MAX_TABLES, TableId,
    config::ConfigError,
    geometry::TableGeometry,
    pattern::RuleSet,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path};

/// Table configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Table ID (1-based)
    pub id: TableId,

    /// Display name
    pub name: String,

    /// Region layout on the shared canvas
    pub geometry: TableGeometry,

    /// Ordered pattern rules, first match wins
    pub rules: RuleSet,
}

impl TableConfig {
    pub fn new(id: TableId, geometry: TableGeometry, rules: RuleSet) -> Self {
        Self {
            id,
            name: format!("Table {id}"),
            geometry,
            rules,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.id == 0 || usize::from(self.id) > MAX_TABLES {
            return Err(format!("Table id must be between 1 and {MAX_TABLES}"));
        }

        if self.rules.is_empty() {
            return Err("At least one pattern rule is required".to_string());
        }

        self.geometry.validate()
    }
}

/// One table entry in a roster file. Rules fall back to the roster default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterTable {
    pub id: TableId,
    #[serde(default)]
    pub name: Option<String>,
    pub geometry: TableGeometry,
    #[serde(default)]
    pub rules: Option<RuleSet>,
}

/// JSON roster file: every table's geometry and rules.
///
/// ```json
/// {
///   "default_rules": "BBP-P;BPB-B",
///   "tables": [
///     { "id": 1, "geometry": { ... } },
///     { "id": 2, "geometry": { ... }, "rules": "PPP-B" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterConfig {
    pub default_rules: RuleSet,
    pub tables: Vec<RosterTable>,
}

impl RosterConfig {
    /// Read and validate a roster file. Rule strings are checked while parsing.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let roster: Self = serde_json::from_str(&text).map_err(|e| ConfigError::Invalid {
            var: path.display().to_string(),
            reason: e.to_string(),
        })?;
        roster.validate()?;
        Ok(roster)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tables.len() > MAX_TABLES {
            return Err(ConfigError::Invalid {
                var: "tables".to_string(),
                reason: format!("At most {MAX_TABLES} tables, got {}", self.tables.len()),
            });
        }

        let mut seen = HashSet::new();
        for config in self.table_configs() {
            if !seen.insert(config.id) {
                return Err(ConfigError::Invalid {
                    var: format!("tables[{}]", config.id),
                    reason: "Duplicate table id".to_string(),
                });
            }
            config.validate().map_err(|reason| ConfigError::Invalid {
                var: format!("tables[{}]", config.id),
                reason,
            })?;
        }

        Ok(())
    }

    /// Resolve each entry into a full table configuration
    pub fn table_configs(&self) -> Vec<TableConfig> {
        self.tables
            .iter()
            .map(|entry| TableConfig {
                id: entry.id,
                name: entry
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Table {}", entry.id)),
                geometry: entry.geometry.clone(),
                rules: entry
                    .rules
                    .clone()
                    .unwrap_or_else(|| self.default_rules.clone()),
            })
            .collect()
    }
}
