//! Reading the destination space and guarding fresh syncs against
//! overwriting populated spaces.

use tracing::{error, info};

use crate::client::{fetch_all, ManagementApi, Query, PAGE_SIZE};
use crate::errors::{ApiError, SyncError};
use crate::models::{Asset, Entry, SpaceSnapshot};
use crate::rate_limit::RequestScheduler;

const EXISTING_CONTENT_HELP: &str = "\
Your destination space already has some content.
If this is a fresh sync, please clear the content before synchronizing, otherwise
conflicts can occur. If it's not a fresh sync, make sure you provide the tool
with a sync token for the last sync.

If you know what you're doing, you can use the parameter --force-overwrite
which will overwrite any entities with the same ID on the destination space.

Be aware that any existing content types on the destination space that do not
exist on the source space with the same ID will be deleted on future syncs.";

/// Explanation shown to the user when a fresh sync meets existing content.
pub fn existing_content_help() -> &'static str {
    EXISTING_CONTENT_HELP
}

/// Reads the parts of the destination space the pipeline needs to compare
/// against: the full content model plus the entries and assets sharing an
/// ID with the source.
pub struct DestinationReader<'a> {
    management: &'a dyn ManagementApi,
    scheduler: &'a RequestScheduler,
}

impl<'a> DestinationReader<'a> {
    pub fn new(management: &'a dyn ManagementApi, scheduler: &'a RequestScheduler) -> Self {
        Self {
            management,
            scheduler,
        }
    }

    pub async fn read(&self, source: &SpaceSnapshot) -> Result<SpaceSnapshot, SyncError> {
        self.read_inner(source)
            .await
            .map_err(SyncError::DestinationUnavailable)
    }

    async fn read_inner(&self, source: &SpaceSnapshot) -> Result<SpaceSnapshot, ApiError> {
        let management = self.management;
        let space = self
            .scheduler
            .call("destination.space", move |_| async move {
                management.space().await
            })
            .await?;
        info!(space = %space.sys.id, name = %space.name, "reading destination space");

        let content_types = fetch_all(
            self.scheduler,
            "destination.content_types",
            Query::page(0),
            move |q| async move { management.content_types(&q).await },
        )
        .await?;
        let locales = fetch_all(
            self.scheduler,
            "destination.locales",
            Query::page(0),
            move |q| async move { management.locales(&q).await },
        )
        .await?;

        let entry_ids = ids(
            source.entries.iter().map(|e| &e.sys.id),
            source.deleted_entries.iter().map(|s| &s.id),
        );
        let asset_ids = ids(
            source.assets.iter().map(|a| &a.sys.id),
            source.deleted_assets.iter().map(|s| &s.id),
        );

        let mut entries: Vec<Entry> = Vec::new();
        for chunk in entry_ids.chunks(PAGE_SIZE) {
            let query = Query::page(0).with_ids(chunk.to_vec());
            entries.extend(
                fetch_all(self.scheduler, "destination.entries", query, move |q| async move {
                    management.entries(&q).await
                })
                .await?,
            );
        }
        let mut assets: Vec<Asset> = Vec::new();
        for chunk in asset_ids.chunks(PAGE_SIZE) {
            let query = Query::page(0).with_ids(chunk.to_vec());
            assets.extend(
                fetch_all(self.scheduler, "destination.assets", query, move |q| async move {
                    management.assets(&q).await
                })
                .await?,
            );
        }

        info!(
            content_types = content_types.len(),
            locales = locales.len(),
            entries = entries.len(),
            assets = assets.len(),
            "destination space read"
        );
        Ok(SpaceSnapshot {
            content_types,
            locales,
            entries,
            assets,
            ..Default::default()
        })
    }
}

fn ids<'s>(
    live: impl Iterator<Item = &'s String>,
    deleted: impl Iterator<Item = &'s String>,
) -> Vec<String> {
    let mut ids: Vec<String> = live.chain(deleted).cloned().collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Options applied to the destination snapshot before transformation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardOptions {
    pub force_overwrite: bool,
    pub skip_content_model: bool,
}

/// Prepare the destination snapshot for the rest of the run.
///
/// With `skip_content_model` the destination model is hidden so nothing
/// model-related is diffed or deleted. A fresh sync into a destination that
/// already holds content types or assets is refused unless
/// `force_overwrite` is set.
pub fn get_transformed_destination_response(
    mut destination: SpaceSnapshot,
    source: &SpaceSnapshot,
    opts: &GuardOptions,
) -> Result<SpaceSnapshot, SyncError> {
    if opts.skip_content_model {
        destination.content_types.clear();
        destination.locales.clear();
    }

    let populated = !destination.content_types.is_empty() || !destination.assets.is_empty();
    if source.is_initial_sync && populated && !opts.force_overwrite {
        error!(
            content_types = destination.content_types.len(),
            assets = destination.assets.len(),
            "{}",
            EXISTING_CONTENT_HELP
        );
        return Err(SyncError::ExistingContentConflict);
    }
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::client::{Collection, PutRequest};
    use crate::models::{AssetFields, ContentType, EntityKind, Locale, Space, Sys};
    use crate::rate_limit::RetryPolicy;

    fn content_type(id: &str) -> ContentType {
        ContentType {
            sys: Sys::new(id),
            name: id.into(),
            description: None,
            display_field: None,
            fields: vec![],
        }
    }

    fn asset(id: &str) -> Asset {
        Asset {
            sys: Sys::new(id),
            fields: AssetFields::default(),
        }
    }

    fn entry(id: &str) -> Entry {
        Entry {
            sys: Sys::new(id),
            fields: Default::default(),
        }
    }

    fn locale(code: &str) -> Locale {
        Locale {
            sys: Some(Sys::new(code)),
            code: code.into(),
            name: code.into(),
            default: false,
            fallback_code: None,
            optional: false,
            content_delivery_api: true,
            content_management_api: true,
        }
    }

    #[test]
    fn test_fresh_sync_into_populated_space_fails() {
        let source = SpaceSnapshot {
            is_initial_sync: true,
            ..Default::default()
        };
        let destination = SpaceSnapshot {
            content_types: vec![content_type("A"), content_type("B")],
            ..Default::default()
        };
        let result =
            get_transformed_destination_response(destination, &source, &GuardOptions::default());
        assert!(matches!(result, Err(SyncError::ExistingContentConflict)));
    }

    #[test]
    fn test_assets_alone_trigger_conflict() {
        let source = SpaceSnapshot {
            is_initial_sync: true,
            ..Default::default()
        };
        let destination = SpaceSnapshot {
            assets: vec![asset("a1")],
            ..Default::default()
        };
        assert!(
            get_transformed_destination_response(destination, &source, &GuardOptions::default())
                .is_err()
        );
    }

    #[test]
    fn test_force_overwrite_passes_through() {
        let source = SpaceSnapshot {
            is_initial_sync: true,
            ..Default::default()
        };
        let destination = SpaceSnapshot {
            content_types: vec![content_type("A")],
            ..Default::default()
        };
        let opts = GuardOptions {
            force_overwrite: true,
            ..Default::default()
        };
        let result = get_transformed_destination_response(destination.clone(), &source, &opts);
        assert_eq!(result.unwrap(), destination);
    }

    #[test]
    fn test_incremental_sync_is_not_guarded() {
        let source = SpaceSnapshot::default();
        let destination = SpaceSnapshot {
            content_types: vec![content_type("A")],
            assets: vec![asset("a1")],
            ..Default::default()
        };
        assert!(
            get_transformed_destination_response(destination, &source, &GuardOptions::default())
                .is_ok()
        );
    }

    #[test]
    fn test_skip_content_model_hides_model() {
        let source = SpaceSnapshot {
            is_initial_sync: true,
            ..Default::default()
        };
        let destination = SpaceSnapshot {
            content_types: vec![content_type("A")],
            locales: vec![locale("en-US")],
            ..Default::default()
        };
        let opts = GuardOptions {
            skip_content_model: true,
            ..Default::default()
        };
        let result = get_transformed_destination_response(destination, &source, &opts).unwrap();
        assert!(result.content_types.is_empty());
        assert!(result.locales.is_empty());
    }

    #[test]
    fn test_ids_are_merged_and_deduplicated() {
        let live = vec!["b".to_string(), "a".to_string()];
        let deleted = vec!["a".to_string(), "c".to_string()];
        assert_eq!(ids(live.iter(), deleted.iter()), vec!["a", "b", "c"]);
    }

    /// Records every entry query it receives.
    struct RecordingDestination {
        entry_queries: Mutex<Vec<Query>>,
    }

    #[async_trait]
    impl ManagementApi for RecordingDestination {
        async fn space(&self) -> Result<Space, ApiError> {
            Ok(Space {
                sys: Sys::new("dst"),
                name: "Destination".into(),
            })
        }
        async fn content_types(&self, _: &Query) -> Result<Collection<ContentType>, ApiError> {
            Ok(Collection {
                items: vec![content_type("A")],
                total: 1,
                skip: 0,
                limit: 100,
            })
        }
        async fn locales(&self, _: &Query) -> Result<Collection<Locale>, ApiError> {
            Ok(Collection {
                items: vec![locale("en-US")],
                total: 1,
                skip: 0,
                limit: 100,
            })
        }
        async fn entries(&self, q: &Query) -> Result<Collection<Entry>, ApiError> {
            self.entry_queries.lock().unwrap().push(q.clone());
            let items: Vec<Entry> = q
                .ids
                .iter()
                .flatten()
                .filter(|id| id.starts_with("keep"))
                .map(|id| entry(id))
                .collect();
            let total = items.len();
            Ok(Collection {
                items,
                total,
                skip: 0,
                limit: 100,
            })
        }
        async fn assets(&self, _: &Query) -> Result<Collection<Asset>, ApiError> {
            Ok(Collection {
                items: vec![],
                total: 0,
                skip: 0,
                limit: 100,
            })
        }
        async fn fetch_sys(&self, _: EntityKind, _: &str) -> Result<Option<Sys>, ApiError> {
            unimplemented!()
        }
        async fn put(&self, _: EntityKind, _: &PutRequest) -> Result<Sys, ApiError> {
            unimplemented!()
        }
        async fn publish(&self, _: EntityKind, _: &str, _: u64) -> Result<Sys, ApiError> {
            unimplemented!()
        }
        async fn unpublish(&self, _: EntityKind, _: &str, _: u64) -> Result<Sys, ApiError> {
            unimplemented!()
        }
        async fn delete(&self, _: EntityKind, _: &str, _: Option<u64>) -> Result<(), ApiError> {
            unimplemented!()
        }
        async fn process_asset(&self, _: &str, _: u64, _: &str) -> Result<(), ApiError> {
            unimplemented!()
        }
        async fn asset(&self, _: &str) -> Result<Asset, ApiError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_reads_entries_in_id_chunks() {
        let destination = RecordingDestination {
            entry_queries: Mutex::new(vec![]),
        };
        let scheduler =
            RequestScheduler::new(1000, Duration::from_millis(10), RetryPolicy::no_retry())
                .unwrap();
        let mut source = SpaceSnapshot::default();
        for i in 0..150 {
            source.entries.push(entry(&format!("e{:03}", i)));
        }
        source.deleted_entries.push(Sys::new("keep-deleted"));

        let reader = DestinationReader::new(&destination, &scheduler);
        let snapshot = reader.read(&source).await.unwrap();

        let queries = destination.entry_queries.lock().unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].ids.as_ref().unwrap().len(), 100);
        assert_eq!(queries[1].ids.as_ref().unwrap().len(), 51);
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].sys.id, "keep-deleted");
        assert_eq!(snapshot.content_types.len(), 1);
        assert_eq!(snapshot.locales[0].code, "en-US");
    }
}
