//!
//! Create-delegation registry.
//!
//! Lists the entity types whose creation can be delegated to groups through
//! `<type>_creator` relations on the organization. Built once at startup
//! from typed configuration and checked against the declared entity types.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::ConfigError;
use crate::types::relation;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CreatableType {
    pub object_type: String,
    /// Relation on the organization granting creation; defaults to `<type>_creator`.
    #[serde(default)]
    pub creator_relation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub creatable_types: Vec<CreatableType>,
}

impl RegistryConfig {
    pub fn with_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RegistryConfig {
            creatable_types: types
                .into_iter()
                .map(|t| CreatableType { object_type: t.into(), creator_relation: None })
                .collect(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }
}

/// Lowercase ascii letters, digits and underscores, starting with a letter.
pub(crate) fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatorRegistry {
    /// Creatable type -> creator relation.
    creatable: BTreeMap<String, String>,
}

impl CreatorRegistry {
    pub fn from_config(config: &RegistryConfig) -> Result<Self, ConfigError> {
        let mut creatable = BTreeMap::new();
        for entry in &config.creatable_types {
            if !is_valid_name(&entry.object_type) {
                return Err(ConfigError::InvalidName(entry.object_type.clone()));
            }
            let rel = entry
                .creator_relation
                .clone()
                .unwrap_or_else(|| relation::creator(&entry.object_type));
            if !is_valid_name(&rel) {
                return Err(ConfigError::InvalidName(rel));
            }
            if creatable.insert(entry.object_type.clone(), rel).is_some() {
                return Err(ConfigError::DuplicateCreatableType(entry.object_type.clone()));
            }
        }
        tracing::debug!(types = creatable.len(), "creator registry built");
        Ok(CreatorRegistry { creatable })
    }

    pub fn supports_creation(&self, object_type: &str) -> bool {
        self.creatable.contains_key(object_type)
    }

    pub fn creator_relation(&self, object_type: &str) -> Option<&str> {
        self.creatable.get(object_type).map(String::as_str)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.creatable.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.creatable.is_empty()
    }

    /// Every creatable type must be a declared entity type.
    pub fn validate_against(&self, declared: &BTreeSet<String>) -> Result<(), ConfigError> {
        match self.creatable.keys().find(|t| !declared.contains(*t)) {
            Some(unknown) => Err(ConfigError::UnknownCreatableType(unknown.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parses_json_with_defaults() {
        let cfg = RegistryConfig::from_json_str(
            r#"{"creatable_types":[{"object_type":"control"},{"object_type":"risk","creator_relation":"risk_author"}]}"#,
        )
        .unwrap();
        let reg = CreatorRegistry::from_config(&cfg).unwrap();
        assert!(reg.supports_creation("control"));
        assert_eq!(reg.creator_relation("control"), Some("control_creator"));
        assert_eq!(reg.creator_relation("risk"), Some("risk_author"));
        assert!(!reg.supports_creation("task"));
    }

    #[test]
    fn test_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"creatable_types":[{{"object_type":"program"}}]}}"#).unwrap();
        let cfg = RegistryConfig::from_path(file.path()).unwrap();
        assert_eq!(cfg, RegistryConfig::with_types(["program"]));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RegistryConfig::from_path(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_rejects_bad_entries() {
        assert!(matches!(RegistryConfig::from_json_str("{"), Err(ConfigError::Parse(_))));
        assert_eq!(
            CreatorRegistry::from_config(&RegistryConfig::with_types(["control", "control"])),
            Err(ConfigError::DuplicateCreatableType("control".into()))
        );
        assert_eq!(
            CreatorRegistry::from_config(&RegistryConfig::with_types([""])),
            Err(ConfigError::InvalidName("".into()))
        );
        assert!(CreatorRegistry::from_config(&RegistryConfig::with_types(["Bad-Name"])).is_err());
    }

    #[test]
    fn test_validates_against_declared_types() {
        let reg = CreatorRegistry::from_config(&RegistryConfig::with_types(["control", "ghost"])).unwrap();
        let declared: BTreeSet<String> = ["control".to_string(), "risk".to_string()].into();
        assert_eq!(reg.validate_against(&declared), Err(ConfigError::UnknownCreatableType("ghost".into())));
    }
}
