//! Canonical catalog entities and the mutations that carry them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const API_VERSION: &str = "backstage.io/v1alpha1";
pub const COMPONENT_KIND: &str = "Component";

pub const ANNOTATION_MTA_URL: &str = "mta-url";
pub const ANNOTATION_ISSUES_URL: &str = "issues-url";
pub const ANNOTATION_APPLICATION_ID: &str = "mta.io/application-id";
pub const ANNOTATION_MANAGED_BY_LOCATION: &str = "backstage.io/managed-by-location";
pub const ANNOTATION_MANAGED_BY_ORIGIN_LOCATION: &str = "backstage.io/managed-by-origin-location";
pub const ANNOTATION_SOURCE_LOCATION: &str = "backstage.io/source-location";
pub const ANNOTATION_REPOSITORY_BRANCH: &str = "mta.io/repository-branch";
pub const ANNOTATION_REPOSITORY_PATH: &str = "mta.io/repository-path";
pub const ANNOTATION_BINARY: &str = "mta.io/binary";
pub const ANNOTATION_RISK: &str = "mta.io/risk";
pub const ANNOTATION_EFFORT: &str = "mta.io/effort";

/// `kind:namespace/name` triple identifying an entity in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl EntityRef {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Lowercased form used as the catalog's comparison key.
    pub fn canonical(&self) -> String {
        self.to_string().to_ascii_lowercase()
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetadata {
    pub name: String,
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// The source record echoed back for the UI layer.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub application: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(rename = "type")]
    pub component_type: String,
    pub lifecycle: String,
    pub owner: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// The catalog's representation of one MTA application.
///
/// Always rebuilt from the latest record; never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEntity {
    pub api_version: String,
    pub kind: String,
    pub metadata: EntityMetadata,
    pub spec: ComponentSpec,
}

impl CanonicalEntity {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(
            &self.kind,
            &self.metadata.namespace,
            &self.metadata.name,
        )
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }
}

/// An entity together with the provider-origin marker the catalog uses to
/// scope its diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidedEntity {
    pub entity: CanonicalEntity,
    pub location_key: String,
}

/// Message sent to the catalog processing engine.
///
/// The engine only ever emits [`EntityMutation::Full`]; `Delta` exists for
/// catalog backends and tooling that replay explicit changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntityMutation {
    /// Complete replacement set for the submitting provider.
    Full { entities: Vec<ProvidedEntity> },
    /// Explicit additions and removals.
    Delta {
        added: Vec<ProvidedEntity>,
        removed: Vec<EntityRef>,
    },
}

impl EntityMutation {
    pub fn full(entities: Vec<ProvidedEntity>) -> Self {
        Self::Full { entities }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }

    /// Number of entities asserted (full) or added (delta).
    pub fn entity_count(&self) -> usize {
        match self {
            Self::Full { entities } => entities.len(),
            Self::Delta { added, .. } => added.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ref_display_and_canonical() {
        let r = EntityRef::new("Component", "default", "mta-17");
        assert_eq!(r.to_string(), "Component:default/mta-17");
        assert_eq!(r.canonical(), "component:default/mta-17");
    }

    #[test]
    fn test_full_mutation_wire_shape() {
        let mutation = EntityMutation::full(vec![]);
        let json = serde_json::to_value(&mutation).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "full", "entities": [] }));
    }
}
