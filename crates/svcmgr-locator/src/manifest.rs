//! Static declarations of which interface instances a process expects.
//!
//! A manifest maps interface names to the instance names declared for them:
//!
//! ```yaml
//! interfaces:
//!   storage:
//!     - default
//!     - backup
//!   power: [default]
//! ```
//!
//! A service name is declared when it is `<iface>.<instance>` or
//! `<iface>/<instance>` for a declared pair. Queries never touch the
//! transport.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use svcmgr_common::ServiceName;

/// Separators allowed between an interface and an instance name.
const INSTANCE_SEPARATORS: [char; 2] = ['.', '/'];

/// Interface-to-instances declarations, immutable once the locator holds it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationManifest {
    #[serde(default)]
    interfaces: BTreeMap<String, BTreeSet<String>>,
}

impl DeclarationManifest {
    /// An empty manifest: nothing is declared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `instance` to the instances declared for `interface`.
    pub fn declare(mut self, interface: impl Into<String>, instance: impl Into<String>) -> Self {
        self.interfaces
            .entry(interface.into())
            .or_default()
            .insert(instance.into());
        self
    }

    /// Load a manifest from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read manifest file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load a manifest from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let manifest: DeclarationManifest =
            serde_yaml::from_str(content).context("Failed to parse YAML manifest")?;

        manifest.validate()?;
        Ok(manifest)
    }

    /// Rejects names that could never form a valid service name.
    pub fn validate(&self) -> Result<()> {
        for (interface, instances) in &self.interfaces {
            check_segment("Interface", interface)?;
            if instances.is_empty() {
                return Err(anyhow!("Interface {} declares no instances", interface));
            }
            for instance in instances {
                check_segment("Instance", instance)
                    .with_context(|| format!("Invalid instance of {}", interface))?;
                // Interfaces may be dotted; instances are the last segment
                if instance.contains(INSTANCE_SEPARATORS) {
                    return Err(anyhow!(
                        "Instance {:?} of {} must not contain '.' or '/'",
                        instance,
                        interface
                    ));
                }
            }
        }
        Ok(())
    }

    /// Returns true if `name` is a declared `<iface>.<instance>` or
    /// `<iface>/<instance>`.
    pub fn is_declared(&self, name: &ServiceName) -> bool {
        let name = name.as_str();
        self.interfaces.iter().any(|(interface, instances)| {
            name.strip_prefix(interface.as_str())
                .and_then(|rest| rest.strip_prefix(INSTANCE_SEPARATORS))
                .map_or(false, |instance| instances.contains(instance))
        })
    }

    /// Instances declared for `interface`, sorted. Empty if none.
    pub fn declared_instances(&self, interface: &str) -> Vec<String> {
        self.interfaces
            .get(interface)
            .map(|instances| instances.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every declared pair as a `<iface>.<instance>` service name.
    pub fn service_names(&self) -> Vec<ServiceName> {
        self.interfaces
            .iter()
            .flat_map(|(interface, instances)| {
                instances
                    .iter()
                    .map(move |instance| ServiceName::from(format!("{}.{}", interface, instance)))
            })
            .collect()
    }

    /// Number of declared interfaces.
    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

fn check_segment(kind: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(anyhow!("{} name must not be empty", kind));
    }
    if segment.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(anyhow!("{} name contains invalid characters: {:?}", kind, segment));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn storage() -> DeclarationManifest {
        DeclarationManifest::new()
            .declare("storage", "default")
            .declare("storage", "backup")
            .declare("power", "default")
    }

    #[test]
    fn test_declared_with_either_separator() {
        let manifest = storage();

        assert!(manifest.is_declared(&ServiceName::from("storage.default")));
        assert!(manifest.is_declared(&ServiceName::from("storage/backup")));
        assert!(manifest.is_declared(&ServiceName::from("power.default")));
    }

    #[test]
    fn test_undeclared_names() {
        let manifest = storage();

        assert!(!manifest.is_declared(&ServiceName::from("storage.other")));
        assert!(!manifest.is_declared(&ServiceName::from("storage")));
        assert!(!manifest.is_declared(&ServiceName::from("storagedefault")));
        assert!(!manifest.is_declared(&ServiceName::from("storage:default")));
        assert!(!manifest.is_declared(&ServiceName::from("camera.default")));
        assert!(!DeclarationManifest::new().is_declared(&ServiceName::from("storage.default")));
    }

    #[test]
    fn test_declared_instances() {
        let manifest = storage();

        assert_eq!(manifest.declared_instances("storage"), vec!["backup", "default"]);
        assert!(manifest.declared_instances("camera").is_empty());
    }

    #[test]
    fn test_service_names() {
        assert_eq!(
            storage().service_names(),
            vec![
                ServiceName::from("power.default"),
                ServiceName::from("storage.backup"),
                ServiceName::from("storage.default"),
            ]
        );
    }

    #[test]
    fn test_load_from_string() {
        let yaml = r#"
interfaces:
  storage:
    - default
  power: [default, low]
"#;
        let manifest = DeclarationManifest::load_from_string(yaml).unwrap();

        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.declared_instances("power"), vec!["default", "low"]);
    }

    #[test]
    fn test_empty_document_is_empty_manifest() {
        let manifest = DeclarationManifest::load_from_string("{}").unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_load_rejects_invalid_declarations() {
        assert!(DeclarationManifest::load_from_string("interfaces:\n  storage: []\n").is_err());
        assert!(DeclarationManifest::load_from_string("interfaces:\n  storage: [\"a b\"]\n").is_err());
        assert!(DeclarationManifest::load_from_string("interfaces:\n  storage: [\"a.b\"]\n").is_err());
        assert!(DeclarationManifest::load_from_string("interfaces: [storage]\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "interfaces:\n  storage: [default]").unwrap();

        let manifest = DeclarationManifest::load_from_file(file.path()).unwrap();
        assert!(manifest.is_declared(&ServiceName::from("storage.default")));

        let err = DeclarationManifest::load_from_file("/nonexistent/manifest.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read manifest file"));
    }
}
