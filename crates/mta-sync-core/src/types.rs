//! Remote application records as served by the MTA hub.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Reference to another hub object (business service, owner, bucket).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ref {
    #[serde(
        default,
        deserialize_with = "deserialize_identifier",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Tag attached to an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

/// Source repository coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Risk or effort score. The hub reports numbers for effort and either
/// numbers or colour labels for risk depending on its version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Score {
    Numeric(f64),
    Label(String),
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Numeric(n) => write!(f, "{n}"),
            Score::Label(l) => write!(f, "{l}"),
        }
    }
}

/// One application in the remote inventory.
///
/// Snapshot for a single fetch; never mutated afterwards. Every field is
/// optional on the wire so one sloppy record cannot make the whole inventory
/// undecodable. Elements that still fail to decode are carried as
/// [`RemoteApplicationRecord::undecodable`] so the mapper can reject them
/// individually.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteApplicationRecord {
    #[serde(
        default,
        deserialize_with = "deserialize_identifier",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Older hub builds spell this `buisnessService`.
    #[serde(
        default,
        alias = "buisnessService",
        skip_serializing_if = "Option::is_none"
    )]
    pub business_service: Option<Ref>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Ref>,

    #[serde(default)]
    pub assessed: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<Tag>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<Score>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<Score>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,

    /// Binary coordinate (e.g. `group:artifact:version:packaging`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<Ref>,

    /// Set when the wire element could not be decoded into this shape.
    #[serde(skip)]
    pub decode_error: Option<String>,
}

impl RemoteApplicationRecord {
    /// Builds a placeholder for an inventory element that failed to decode.
    ///
    /// The identifier is salvaged from the raw JSON when possible so the
    /// resulting mapping error can point at the offending record.
    pub fn undecodable(raw: &Value, error: impl Into<String>) -> Self {
        let id = raw.get("id").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        Self {
            id,
            decode_error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Decodes one inventory element, never failing.
    pub fn from_value(raw: Value) -> Self {
        match serde_json::from_value::<Self>(raw.clone()) {
            Ok(record) => record,
            Err(e) => Self::undecodable(&raw, e.to_string()),
        }
    }

    /// Stable identifier exactly as the hub sent it; `None` when absent or
    /// blank. Identifiers are opaque, so surrounding whitespace is kept.
    pub fn identifier(&self) -> Option<&str> {
        self.id.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Display name, trimmed; `None` when absent or blank.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Accepts identifiers as JSON strings or numbers and normalises them to strings.
fn deserialize_identifier<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    }))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_and_string_identifiers() {
        let numeric: RemoteApplicationRecord =
            serde_json::from_value(json!({ "id": 17, "name": "billing" })).unwrap();
        assert_eq!(numeric.identifier(), Some("17"));

        let text: RemoteApplicationRecord =
            serde_json::from_value(json!({ "id": "17", "name": "billing" })).unwrap();
        assert_eq!(text.identifier(), Some("17"));
    }

    #[test]
    fn test_full_hub_record() {
        let record: RemoteApplicationRecord = serde_json::from_value(json!({
            "id": 3,
            "name": "Customer Portal",
            "description": "Public facing portal",
            "buisnessService": { "id": 1, "name": "Retail" },
            "owner": { "id": 9, "name": "jdoe" },
            "assessed": true,
            "tags": [{ "name": "Java", "source": "language-discovery", "virtual": true }],
            "effort": 5,
            "risk": "green",
            "comments": "legacy",
            "binary": "com.example:portal:1.0:war",
            "repository": { "kind": "git", "branch": "main", "url": "https://git.example.com/portal.git" },
            "bucket": { "id": "b-1", "name": "bucket" },
            "migrationWave": null
        }))
        .unwrap();

        assert_eq!(record.display_name(), Some("Customer Portal"));
        assert_eq!(
            record.business_service.as_ref().and_then(|r| r.name.as_deref()),
            Some("Retail")
        );
        assert_eq!(record.tags.len(), 1);
        assert!(record.tags[0].is_virtual);
        assert_eq!(record.effort, Some(Score::Numeric(5.0)));
        assert_eq!(record.risk, Some(Score::Label("green".into())));
        assert_eq!(
            record.repository.as_ref().and_then(|r| r.branch.as_deref()),
            Some("main")
        );
        assert!(record.decode_error.is_none());
    }

    #[test]
    fn test_null_tags_and_blank_fields() {
        let record: RemoteApplicationRecord =
            serde_json::from_value(json!({ "id": " ", "name": "  ", "tags": null })).unwrap();
        assert!(record.tags.is_empty());
        assert_eq!(record.identifier(), None);
        assert_eq!(record.display_name(), None);
    }

    #[test]
    fn test_identifier_is_opaque() {
        let padded: RemoteApplicationRecord =
            serde_json::from_value(json!({ "id": " 7", "name": "x" })).unwrap();
        assert_eq!(padded.identifier(), Some(" 7"));
    }

    #[test]
    fn test_undecodable_element_keeps_identifier() {
        let record = RemoteApplicationRecord::from_value(json!({ "id": 8, "tags": "not-a-list" }));
        assert_eq!(record.identifier(), Some("8"));
        assert!(record.decode_error.is_some());

        let record = RemoteApplicationRecord::from_value(json!("just a string"));
        assert_eq!(record.identifier(), None);
        assert!(record.decode_error.is_some());
    }
}
