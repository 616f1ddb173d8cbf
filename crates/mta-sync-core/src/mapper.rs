//! Pure transformation from remote application records to catalog entities.
//!
//! Entity names are derived from the remote identifier, never from the
//! display name, so renames upstream keep the same catalog entity and the
//! annotation links pointing at it stay valid.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use url::Url;

use crate::entity::*;
use crate::error::MappingError;
use crate::types::RemoteApplicationRecord;

/// Prefix of every generated entity name.
pub const NAME_PREFIX: &str = "mta-";
/// Prefix used when the escaped identifier would be too long.
pub const HASHED_NAME_PREFIX: &str = "mta-h-";
/// Upper bound the catalog enforces on entity names and tags.
pub const MAX_NAME_LEN: usize = 63;

/// Settings the mapper needs beyond the record itself.
#[derive(Debug, Clone)]
pub struct MapperOptions {
    /// Hub UI base, used for `mta-url` and derived links.
    pub base_url: Url,
    /// Provider instance id; scopes the location key.
    pub provider_id: String,
    pub namespace: String,
    /// Owner ref used when the record names no owner.
    pub owner_fallback: String,
    pub lifecycle: String,
}

/// Output of mapping one fetched inventory.
#[derive(Debug, Clone, Default)]
pub struct MappedBatch {
    /// One entity per distinct entity name, in first-seen order.
    pub entities: Vec<ProvidedEntity>,
    pub errors: Vec<MappingError>,
    /// Entity names that appeared more than once in the batch.
    pub conflicts: Vec<String>,
}

impl MappedBatch {
    pub fn entity_names(&self) -> BTreeSet<String> {
        self.entities
            .iter()
            .map(|e| e.entity.metadata.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct EntityMapper {
    options: MapperOptions,
    location_key: String,
}

impl EntityMapper {
    pub fn new(options: MapperOptions) -> Self {
        let location_key = format!("mta-provider:{}", options.provider_id);
        Self {
            options,
            location_key,
        }
    }

    pub fn options(&self) -> &MapperOptions {
        &self.options
    }

    /// Maps a single record.
    pub fn map(&self, record: &RemoteApplicationRecord) -> Result<CanonicalEntity, MappingError> {
        let id = record.identifier();

        if let Some(reason) = &record.decode_error {
            return Err(MappingError::new(id, format!("undecodable record: {reason}")));
        }
        let Some(display_name) = record.display_name() else {
            return Err(MappingError::new(id, MappingError::MISSING_NAME));
        };
        let Some(id) = id else {
            return Err(MappingError::new(None, MappingError::MISSING_IDENTIFIER));
        };

        let application = serde_json::to_value(record)
            .map_err(|e| MappingError::new(Some(id), format!("cannot serialize record: {e}")))?;

        Ok(CanonicalEntity {
            api_version: API_VERSION.to_string(),
            kind: COMPONENT_KIND.to_string(),
            metadata: EntityMetadata {
                name: entity_name_for(id),
                namespace: self.options.namespace.clone(),
                title: Some(display_name.to_string()),
                description: record
                    .description
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
                annotations: self.annotations(id, record),
                tags: normalize_tags(record.tags.iter().map(|t| t.name.as_str())),
                application,
            },
            spec: ComponentSpec {
                component_type: "service".to_string(),
                lifecycle: self.options.lifecycle.clone(),
                owner: owner_ref(record).unwrap_or_else(|| self.options.owner_fallback.clone()),
                system: record
                    .business_service
                    .as_ref()
                    .and_then(|s| s.name.as_deref())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            },
        })
    }

    /// Maps a whole inventory. Bad records are collected, never fatal;
    /// duplicate identifiers collapse with the last record winning.
    pub fn map_batch(&self, records: &[RemoteApplicationRecord]) -> MappedBatch {
        let mut by_name: IndexMap<String, ProvidedEntity> = IndexMap::new();
        let mut errors = Vec::new();
        let mut conflicts = Vec::new();

        for record in records {
            match self.map(record) {
                Ok(entity) => {
                    let name = entity.metadata.name.clone();
                    let provided = ProvidedEntity {
                        entity,
                        location_key: self.location_key.clone(),
                    };
                    if by_name.insert(name.clone(), provided).is_some() {
                        conflicts.push(name);
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        MappedBatch {
            entities: by_name.into_values().collect(),
            errors,
            conflicts,
        }
    }

    fn annotations(&self, id: &str, record: &RemoteApplicationRecord) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        let location = format!("mta:{}", self.hub_url(&["applications", id], None));

        annotations.insert(ANNOTATION_MTA_URL.into(), self.options.base_url.to_string());
        annotations.insert(
            ANNOTATION_ISSUES_URL.into(),
            self.hub_url(&["issues"], Some(("applicationId", id))).to_string(),
        );
        annotations.insert(ANNOTATION_APPLICATION_ID.into(), id.to_string());
        annotations.insert(ANNOTATION_MANAGED_BY_LOCATION.into(), location.clone());
        annotations.insert(ANNOTATION_MANAGED_BY_ORIGIN_LOCATION.into(), location);

        if let Some(repo) = &record.repository {
            if let Some(url) = non_blank(repo.url.as_deref()) {
                annotations.insert(ANNOTATION_SOURCE_LOCATION.into(), format!("url:{url}"));
            }
            if let Some(branch) = non_blank(repo.branch.as_deref()) {
                annotations.insert(ANNOTATION_REPOSITORY_BRANCH.into(), branch.to_string());
            }
            if let Some(path) = non_blank(repo.path.as_deref()) {
                annotations.insert(ANNOTATION_REPOSITORY_PATH.into(), path.to_string());
            }
        }
        if let Some(binary) = non_blank(record.binary.as_deref()) {
            annotations.insert(ANNOTATION_BINARY.into(), binary.to_string());
        }
        if let Some(risk) = &record.risk {
            annotations.insert(ANNOTATION_RISK.into(), risk.to_string());
        }
        if let Some(effort) = &record.effort {
            annotations.insert(ANNOTATION_EFFORT.into(), effort.to_string());
        }

        annotations
    }

    fn hub_url(&self, segments: &[&str], query: Option<(&str, &str)>) -> Url {
        let mut url = self.options.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if let Some((key, value)) = query {
            url.query_pairs_mut().append_pair(key, value);
        }
        url
    }
}

/// Deterministic, injective entity name for a remote identifier.
///
/// `[a-z0-9]` pass through; every other byte becomes `_XX`. The escape
/// character itself is escaped, and uppercase letters are escaped as well so
/// two identifiers differing only in case stay distinct under the catalog's
/// case-insensitive comparison. An escape never follows the `-` of the
/// prefix: when the identifier starts with one, the prefix drops its dash
/// (`mta_2Dx`), which keeps every separator between two alphanumerics.
/// Names that would exceed the catalog limit fall back to a SHA-256 digest.
pub fn entity_name_for(id: &str) -> String {
    let mut escaped = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("_{byte:02X}"));
        }
    }

    let prefix = NAME_PREFIX.trim_end_matches('-');
    let name = if escaped.starts_with('_') {
        format!("{prefix}{escaped}")
    } else {
        format!("{NAME_PREFIX}{escaped}")
    };

    if name.len() <= MAX_NAME_LEN {
        return name;
    }

    let digest = hex::encode(Sha256::digest(id.as_bytes()));
    format!("{HASHED_NAME_PREFIX}{}", &digest[..40])
}

/// Lowercases tags and turns each run of disallowed characters into a single
/// `-`. The result is cut to [`MAX_NAME_LEN`] and never starts or ends with
/// `-`. Empties and duplicates are dropped; output is sorted.
pub fn normalize_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    tags.into_iter()
        .filter_map(|tag| {
            let mut collapsed = String::with_capacity(tag.len());
            for c in tag.trim().to_ascii_lowercase().chars() {
                if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, ':' | '+' | '#') {
                    collapsed.push(c);
                } else if !collapsed.is_empty() && !collapsed.ends_with('-') {
                    collapsed.push('-');
                }
            }
            let truncated: String = collapsed.chars().take(MAX_NAME_LEN).collect();
            let normalized = truncated.trim_matches('-');
            (!normalized.is_empty()).then(|| normalized.to_string())
        })
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

fn owner_ref(record: &RemoteApplicationRecord) -> Option<String> {
    let name = non_blank(record.owner.as_ref()?.name.as_deref())?;
    let name: String = name
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .collect();
    Some(format!("user:{name}"))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Ref, Repository, Score, Tag};

    fn mapper() -> EntityMapper {
        EntityMapper::new(MapperOptions {
            base_url: Url::parse("https://mta.example.com/hub").unwrap(),
            provider_id: "prod".into(),
            namespace: "default".into(),
            owner_fallback: "unknown".into(),
            lifecycle: "production".into(),
        })
    }

    fn record(id: &str, name: &str) -> RemoteApplicationRecord {
        RemoteApplicationRecord {
            id: Some(id.into()),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_name_ignores_display_name() {
        let m = mapper();
        let before = m.map(&record("42", "Billing")).unwrap();
        let after = m.map(&record("42", "Billing Service v2")).unwrap();
        assert_eq!(before.metadata.name, "mta-42");
        assert_eq!(before.metadata.name, after.metadata.name);
        assert_eq!(
            before.annotation(ANNOTATION_ISSUES_URL),
            after.annotation(ANNOTATION_ISSUES_URL)
        );
    }

    #[test]
    fn test_entity_name_is_injective() {
        let ids = ["a-b", "a_b", "a.b", "A-b", "a_2Db", "ab", "aB", "a b"];
        let names: BTreeSet<String> = ids.iter().map(|id| entity_name_for(id)).collect();
        assert_eq!(names.len(), ids.len());
        assert_eq!(entity_name_for("a-b"), "mta-a_2Db");
        assert_eq!(entity_name_for("a_2Db"), "mta-a_5F2_44b");
    }

    #[test]
    fn test_escaped_leading_byte_keeps_separators_between_alphanumerics() {
        assert_eq!(entity_name_for("_x"), "mta_5Fx");
        assert_eq!(entity_name_for("-"), "mta_2D");
        assert_eq!(entity_name_for("x_"), "mta-x_5F");
        assert_ne!(entity_name_for("_x"), entity_name_for("5Fx"));
        for id in ["_x", "-", "!!", " 7", "A", "a..b", "x_"] {
            assert!(is_catalog_name(&entity_name_for(id)), "{id:?}");
        }
    }

    #[test]
    fn test_tags_collapse_disallowed_runs() {
        let long = format!("{}-x", "a".repeat(62));
        let tags = normalize_tags(["C / C++", "Java  EE", long.as_str(), " -- ", "--Go--"]);
        assert_eq!(tags[0], "a".repeat(62));
        assert_eq!(&tags[1..], ["c-c++", "go", "java-ee"]);
        assert!(tags.iter().all(|t| is_catalog_tag(t)));
    }

    /// `[a-zA-Z0-9]+([-_.][a-zA-Z0-9]+)*`
    fn is_catalog_name(name: &str) -> bool {
        name.len() <= MAX_NAME_LEN
            && name
                .split(['-', '_', '.'])
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric()))
    }

    /// `[a-z0-9:+#]+(-[a-z0-9:+#]+)*`
    fn is_catalog_tag(tag: &str) -> bool {
        tag.len() <= MAX_NAME_LEN
            && tag.split('-').all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, ':' | '+' | '#'))
            })
    }

    #[test]
    fn test_whitespace_in_identifier_is_significant() {
        let batch = mapper().map_batch(&[record("7", "plain"), record(" 7", "padded")]);
        assert!(batch.conflicts.is_empty());
        assert_eq!(
            batch.entity_names(),
            BTreeSet::from(["mta-7".to_string(), "mta_207".to_string()])
        );
    }

    #[test]
    fn test_long_identifier_is_hashed() {
        let id = "x".repeat(80);
        let name = entity_name_for(&id);
        assert!(name.starts_with(HASHED_NAME_PREFIX));
        assert!(name.len() <= MAX_NAME_LEN);
        assert_eq!(name, entity_name_for(&id));
        assert_ne!(name, entity_name_for(&"x".repeat(81)));
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let m = mapper();
        let err = m
            .map(&RemoteApplicationRecord {
                id: Some("7".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.reason, "missing name");
        assert_eq!(err.record_id.as_deref(), Some("7"));

        let err = m.map(&record("8", "   ")).unwrap_err();
        assert_eq!(err.reason, MappingError::MISSING_NAME);
    }

    #[test]
    fn test_missing_identifier_is_rejected() {
        let m = mapper();
        let err = m
            .map(&RemoteApplicationRecord {
                name: Some("orphan".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.reason, MappingError::MISSING_IDENTIFIER);
    }

    #[test]
    fn test_annotations_and_spec() {
        let m = mapper();
        let rec = RemoteApplicationRecord {
            id: Some("5".into()),
            name: Some("Inventory".into()),
            description: Some("  Stock service ".into()),
            business_service: Some(Ref {
                id: Some("2".into()),
                name: Some("Retail".into()),
            }),
            owner: Some(Ref {
                id: Some("3".into()),
                name: Some("Jane Doe".into()),
            }),
            tags: vec![
                Tag {
                    name: "Java EE".into(),
                    source: None,
                    is_virtual: false,
                },
                Tag {
                    name: "java ee".into(),
                    source: Some("manual".into()),
                    is_virtual: false,
                },
                Tag {
                    name: "C#".into(),
                    source: None,
                    is_virtual: true,
                },
            ],
            risk: Some(Score::Label("yellow".into())),
            effort: Some(Score::Numeric(3.0)),
            binary: Some("com.example:inv:1.0".into()),
            repository: Some(Repository {
                kind: Some("git".into()),
                branch: Some("main".into()),
                path: Some("/svc".into()),
                url: Some("https://git.example.com/inv.git".into()),
            }),
            ..Default::default()
        };

        let entity = m.map(&rec).unwrap();
        assert_eq!(entity.kind, "Component");
        assert_eq!(entity.metadata.title.as_deref(), Some("Inventory"));
        assert_eq!(entity.metadata.description.as_deref(), Some("Stock service"));
        assert_eq!(entity.metadata.tags, vec!["c#", "java-ee"]);
        assert_eq!(entity.spec.owner, "user:Jane-Doe");
        assert_eq!(entity.spec.system.as_deref(), Some("Retail"));
        assert_eq!(
            entity.annotation(ANNOTATION_MTA_URL),
            Some("https://mta.example.com/hub")
        );
        assert_eq!(
            entity.annotation(ANNOTATION_ISSUES_URL),
            Some("https://mta.example.com/hub/issues?applicationId=5")
        );
        assert_eq!(
            entity.annotation(ANNOTATION_MANAGED_BY_LOCATION),
            Some("mta:https://mta.example.com/hub/applications/5")
        );
        assert_eq!(
            entity.annotation(ANNOTATION_SOURCE_LOCATION),
            Some("url:https://git.example.com/inv.git")
        );
        assert_eq!(entity.annotation(ANNOTATION_RISK), Some("yellow"));
        assert_eq!(entity.annotation(ANNOTATION_EFFORT), Some("3"));
        assert_eq!(entity.metadata.application["name"], "Inventory");
    }

    #[test]
    fn test_owner_fallback() {
        let entity = mapper().map(&record("1", "a")).unwrap();
        assert_eq!(entity.spec.owner, "unknown");
        assert_eq!(entity.spec.system, None);
    }

    #[test]
    fn test_batch_isolates_bad_records() {
        let m = mapper();
        let records = vec![
            record("1", "one"),
            RemoteApplicationRecord {
                id: Some("2".into()),
                ..Default::default()
            },
            record("3", "three"),
        ];
        let batch = m.map_batch(&records);
        assert_eq!(batch.entities.len(), 2);
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].record_id.as_deref(), Some("2"));
        assert!(batch.conflicts.is_empty());
        assert!(batch.entities.iter().all(|e| e.location_key == "mta-provider:prod"));
    }

    #[test]
    fn test_batch_duplicates_last_seen_wins() {
        let m = mapper();
        let records = vec![record("1", "first"), record("2", "two"), record("1", "second")];
        let batch = m.map_batch(&records);
        assert_eq!(batch.entities.len(), 2);
        assert_eq!(batch.conflicts, vec!["mta-1".to_string()]);
        assert_eq!(batch.entities[0].entity.metadata.name, "mta-1");
        assert_eq!(
            batch.entities[0].entity.metadata.title.as_deref(),
            Some("second")
        );
    }
}
