use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use mta_sync_core::mapper::MAX_NAME_LEN;
use mta_sync_core::{
    CanonicalEntity, EntityMutation, EntityProviderConnection, EntityRef, ProvidedEntity,
    SubmissionError,
};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredEntity {
    provider: String,
    entity: ProvidedEntity,
}

/// In-memory catalog processing engine.
///
/// Entities are keyed by their lowercased ref and remember which provider
/// submitted them. Mutations are validated completely before anything is
/// written, so a rejected mutation leaves the catalog unchanged.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    entities: RwLock<HashMap<String, StoredEntity>>,
    mutation_count: AtomicU64,
    fail_next: Mutex<Option<SubmissionError>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entities currently attributed to `provider`, sorted by ref.
    pub async fn entities_for(&self, provider: &str) -> Vec<CanonicalEntity> {
        let guard = self.entities.read().await;
        let mut owned: Vec<_> = guard
            .values()
            .filter(|stored| stored.provider == provider)
            .map(|stored| stored.entity.entity.clone())
            .collect();
        owned.sort_by_key(|e| e.entity_ref().canonical());
        owned
    }

    /// Looks up an entity by ref, ignoring case.
    pub async fn get(&self, entity_ref: &EntityRef) -> Option<CanonicalEntity> {
        self.entities
            .read()
            .await
            .get(&entity_ref.canonical())
            .map(|stored| stored.entity.entity.clone())
    }

    /// Provider that owns `entity_ref`, if any.
    pub async fn owner_of(&self, entity_ref: &EntityRef) -> Option<String> {
        self.entities
            .read()
            .await
            .get(&entity_ref.canonical())
            .map(|stored| stored.provider.clone())
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }

    /// Number of mutations applied successfully.
    pub fn mutation_count(&self) -> u64 {
        self.mutation_count.load(Ordering::SeqCst)
    }

    /// Make the next `apply_mutation` call fail with `error`.
    pub async fn fail_next(&self, error: SubmissionError) {
        *self.fail_next.lock().await = Some(error);
    }

    fn check_batch<'a>(
        provider: &str,
        incoming: impl IntoIterator<Item = &'a ProvidedEntity>,
        existing: &HashMap<String, StoredEntity>,
    ) -> Result<HashSet<String>, SubmissionError> {
        let mut keys = HashSet::new();
        for provided in incoming {
            let entity_ref = provided.entity.entity_ref();
            validate_name(&provided.entity.metadata.name)?;

            let key = entity_ref.canonical();
            if !keys.insert(key.clone()) {
                return Err(SubmissionError::rejected(format!(
                    "duplicate entity {entity_ref} in mutation"
                )));
            }
            if let Some(stored) = existing.get(&key)
                && stored.provider != provider
            {
                return Err(SubmissionError::rejected(format!(
                    "entity {entity_ref} is owned by provider {}",
                    stored.provider
                )));
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl EntityProviderConnection for InMemoryCatalog {
    async fn apply_mutation(
        &self,
        provider: &str,
        mutation: EntityMutation,
    ) -> Result<(), SubmissionError> {
        if let Some(error) = self.fail_next.lock().await.take() {
            return Err(error);
        }

        let mut guard = self.entities.write().await;
        match mutation {
            EntityMutation::Full { entities } => {
                let keys = Self::check_batch(provider, &entities, &guard)?;

                let before = guard.len();
                guard.retain(|key, stored| stored.provider != provider || keys.contains(key));
                let removed = before - guard.len();

                let upserted = entities.len();
                for provided in entities {
                    guard.insert(
                        provided.entity.entity_ref().canonical(),
                        StoredEntity {
                            provider: provider.to_string(),
                            entity: provided,
                        },
                    );
                }
                debug!(provider, upserted, removed, "Applied full mutation");
            }
            EntityMutation::Delta { added, removed } => {
                Self::check_batch(provider, &added, &guard)?;

                let mut removed_count = 0usize;
                for entity_ref in &removed {
                    let key = entity_ref.canonical();
                    if guard.get(&key).is_some_and(|s| s.provider == provider) {
                        guard.remove(&key);
                        removed_count += 1;
                    }
                }

                let upserted = added.len();
                for provided in added {
                    guard.insert(
                        provided.entity.entity_ref().canonical(),
                        StoredEntity {
                            provider: provider.to_string(),
                            entity: provided,
                        },
                    );
                }
                debug!(provider, upserted, removed = removed_count, "Applied delta mutation");
            }
        }

        self.mutation_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// `[a-zA-Z0-9]+([-_.][a-zA-Z0-9]+)*`, at most [`MAX_NAME_LEN`] characters.
fn validate_name(name: &str) -> Result<(), SubmissionError> {
    let well_formed = name
        .split(['-', '_', '.'])
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric()));

    if !well_formed || name.len() > MAX_NAME_LEN {
        return Err(SubmissionError::rejected(format!(
            "invalid entity name '{name}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mta_sync_core::entity::{ComponentSpec, EntityMetadata};
    use std::collections::BTreeMap;

    fn provided(name: &str, title: &str) -> ProvidedEntity {
        ProvidedEntity {
            entity: CanonicalEntity {
                api_version: "backstage.io/v1alpha1".into(),
                kind: "Component".into(),
                metadata: EntityMetadata {
                    name: name.into(),
                    namespace: "default".into(),
                    title: Some(title.into()),
                    description: None,
                    annotations: BTreeMap::new(),
                    tags: Vec::new(),
                    application: serde_json::Value::Null,
                },
                spec: ComponentSpec {
                    component_type: "service".into(),
                    lifecycle: "production".into(),
                    owner: "unknown".into(),
                    system: None,
                },
            },
            location_key: "mta-provider:test".into(),
        }
    }

    fn names(entities: &[CanonicalEntity]) -> Vec<&str> {
        entities.iter().map(|e| e.metadata.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_full_mutation_replaces_owned_set() {
        let catalog = InMemoryCatalog::new();
        catalog
            .apply_mutation(
                "p1",
                EntityMutation::full(vec![provided("mta-1", "one"), provided("mta-2", "two")]),
            )
            .await
            .unwrap();
        catalog
            .apply_mutation(
                "p1",
                EntityMutation::full(vec![provided("mta-2", "two v2"), provided("mta-3", "three")]),
            )
            .await
            .unwrap();

        let owned = catalog.entities_for("p1").await;
        assert_eq!(names(&owned), vec!["mta-2", "mta-3"]);
        assert_eq!(owned[0].metadata.title.as_deref(), Some("two v2"));
        assert_eq!(catalog.mutation_count(), 2);

        let fetched = catalog
            .get(&EntityRef::new("component", "DEFAULT", "MTA-3"))
            .await
            .unwrap();
        assert_eq!(fetched.metadata.title.as_deref(), Some("three"));
        assert!(
            catalog
                .get(&EntityRef::new("Component", "default", "mta-1"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_full_mutation_leaves_other_providers_alone() {
        let catalog = InMemoryCatalog::new();
        catalog
            .apply_mutation("other", EntityMutation::full(vec![provided("manual", "m")]))
            .await
            .unwrap();
        catalog
            .apply_mutation("p1", EntityMutation::full(vec![provided("mta-1", "one")]))
            .await
            .unwrap();
        catalog
            .apply_mutation("p1", EntityMutation::full(vec![]))
            .await
            .unwrap();

        assert!(catalog.entities_for("p1").await.is_empty());
        assert_eq!(names(&catalog.entities_for("other").await), vec!["manual"]);
    }

    #[tokio::test]
    async fn test_conflicting_ownership_rejects_whole_mutation() {
        let catalog = InMemoryCatalog::new();
        catalog
            .apply_mutation("other", EntityMutation::full(vec![provided("mta-1", "theirs")]))
            .await
            .unwrap();
        catalog
            .apply_mutation("p1", EntityMutation::full(vec![provided("mta-9", "mine")]))
            .await
            .unwrap();

        let err = catalog
            .apply_mutation(
                "p1",
                EntityMutation::full(vec![provided("mta-2", "new"), provided("MTA-1", "clash")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::Rejected(msg) if msg.contains("owned by provider other")));

        assert_eq!(names(&catalog.entities_for("p1").await), vec!["mta-9"]);
        assert_eq!(catalog.mutation_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let catalog = InMemoryCatalog::new();
        let too_long = "a".repeat(64);
        for bad in [
            "",
            "-leading",
            "trailing.",
            "mta-_5Fx",
            "a--b",
            "has space",
            too_long.as_str(),
        ] {
            let result = catalog
                .apply_mutation("p1", EntityMutation::full(vec![provided(bad, "x")]))
                .await;
            assert!(result.is_err(), "{bad:?} should be rejected");
        }
        assert!(catalog.is_empty().await);

        for good in ["mta_5Fx", "mta-a_2Db", "v1.2-rc"] {
            assert!(validate_name(good).is_ok(), "{good:?} should be accepted");
        }
    }

    #[tokio::test]
    async fn test_delta_mutation_only_removes_owned() {
        let catalog = InMemoryCatalog::new();
        catalog
            .apply_mutation("other", EntityMutation::full(vec![provided("manual", "m")]))
            .await
            .unwrap();
        catalog
            .apply_mutation("p1", EntityMutation::full(vec![provided("mta-1", "one")]))
            .await
            .unwrap();

        catalog
            .apply_mutation(
                "p1",
                EntityMutation::Delta {
                    added: vec![provided("mta-2", "two")],
                    removed: vec![
                        EntityRef::new("Component", "default", "mta-1"),
                        EntityRef::new("Component", "default", "manual"),
                    ],
                },
            )
            .await
            .unwrap();

        assert_eq!(names(&catalog.entities_for("p1").await), vec!["mta-2"]);
        assert_eq!(catalog.len().await, 2);
    }

    #[tokio::test]
    async fn test_fail_next_injects_one_failure() {
        let catalog = InMemoryCatalog::new();
        catalog.fail_next(SubmissionError::Timeout).await;

        let first = catalog
            .apply_mutation("p1", EntityMutation::full(vec![provided("mta-1", "one")]))
            .await;
        assert_eq!(first, Err(SubmissionError::Timeout));
        assert!(catalog.is_empty().await);

        catalog
            .apply_mutation("p1", EntityMutation::full(vec![provided("mta-1", "one")]))
            .await
            .unwrap();
        assert_eq!(
            catalog
                .owner_of(&EntityRef::new("Component", "default", "mta-1"))
                .await
                .as_deref(),
            Some("p1")
        );
    }
}
