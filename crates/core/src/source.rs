//! Reading the source space.
//!
//! Content types and locales come from the management API (they are not part
//! of the sync feed); entries, assets and their deletions come from the
//! delivery sync feed, either a full initial sync or an incremental one
//! resumed from the stored token.

use tracing::{debug, info};

use crate::client::{fetch_all, DeliveryApi, ManagementApi, Query, SyncItem, SyncPage};
use crate::errors::{ApiError, SyncError};
use crate::models::{ContentType, Locale, SpaceSnapshot};
use crate::rate_limit::RequestScheduler;
use crate::token_store::TokenStore;

/// Reads a [`SpaceSnapshot`] of the source space.
pub struct SourceReader<'a> {
    delivery: &'a dyn DeliveryApi,
    management: &'a dyn ManagementApi,
    scheduler: &'a RequestScheduler,
}

impl<'a> SourceReader<'a> {
    pub fn new(
        delivery: &'a dyn DeliveryApi,
        management: &'a dyn ManagementApi,
        scheduler: &'a RequestScheduler,
    ) -> Self {
        Self {
            delivery,
            management,
            scheduler,
        }
    }

    /// Read the source space. A full sync is performed when `fresh` is set
    /// or the store holds no token; otherwise the sync resumes incrementally.
    pub async fn read(
        &self,
        token_store: &dyn TokenStore,
        fresh: bool,
    ) -> Result<SpaceSnapshot, SyncError> {
        let delivery = self.delivery;
        let space = self
            .scheduler
            .call("source.space", move |_| async move { delivery.space().await })
            .await
            .map_err(SyncError::SourceUnavailable)?;
        info!(space = %space.sys.id, name = %space.name, "reading source space");

        let content_types = self
            .content_types()
            .await
            .map_err(SyncError::SourceUnavailable)?;
        let locales = self.locales().await.map_err(SyncError::SourceUnavailable)?;

        let stored = if fresh { None } else { token_store.read()? };
        let mut snapshot = SpaceSnapshot {
            content_types,
            locales,
            is_initial_sync: stored.is_none(),
            ..Default::default()
        };
        match &stored {
            Some(_) => info!(location = %token_store.location(), "resuming incremental sync"),
            None => info!(fresh, "performing initial sync"),
        }

        let mut page = self
            .first_page(stored.as_deref())
            .await
            .map_err(SyncError::SourceUnavailable)?;
        let mut pages = 1;
        loop {
            let next_page = page.next_page_token.take();
            let next_sync = page.next_sync_token.take();
            absorb_page(&mut snapshot, page);
            match next_page {
                Some(token) => {
                    page = self
                        .next_page(token)
                        .await
                        .map_err(SyncError::SourceUnavailable)?;
                    pages += 1;
                }
                None => {
                    snapshot.next_sync_token = Some(next_sync.ok_or(SyncError::MissingSyncToken)?);
                    break;
                }
            }
        }

        info!(
            pages,
            content_types = snapshot.content_types.len(),
            locales = snapshot.locales.len(),
            entries = snapshot.entries.len(),
            assets = snapshot.assets.len(),
            deleted_entries = snapshot.deleted_entries.len(),
            deleted_assets = snapshot.deleted_assets.len(),
            initial = snapshot.is_initial_sync,
            "source space read"
        );
        Ok(snapshot)
    }

    /// Published content types only; drafts have no schema entries can be
    /// validated against.
    async fn content_types(&self) -> Result<Vec<ContentType>, ApiError> {
        let management = self.management;
        let all = fetch_all(self.scheduler, "source.content_types", Query::page(0), move |q| {
            async move { management.content_types(&q).await }
        })
        .await?;
        let total = all.len();
        let published: Vec<ContentType> =
            all.into_iter().filter(|ct| ct.sys.is_published()).collect();
        if published.len() < total {
            debug!(
                skipped = total - published.len(),
                "skipping unpublished source content types"
            );
        }
        Ok(published)
    }

    async fn locales(&self) -> Result<Vec<Locale>, ApiError> {
        let management = self.management;
        fetch_all(self.scheduler, "source.locales", Query::page(0), move |q| async move {
            management.locales(&q).await
        })
        .await
    }

    async fn first_page(&self, token: Option<&str>) -> Result<SyncPage, ApiError> {
        let delivery = self.delivery;
        match token {
            Some(token) => {
                let token = token.to_string();
                self.scheduler
                    .call("source.sync", move |_| {
                        let token = token.clone();
                        async move { delivery.sync_next(&token).await }
                    })
                    .await
            }
            None => {
                self.scheduler
                    .call("source.sync", move |_| async move {
                        delivery.sync_initial().await
                    })
                    .await
            }
        }
    }

    async fn next_page(&self, token: String) -> Result<SyncPage, ApiError> {
        let delivery = self.delivery;
        self.scheduler
            .call("source.sync", move |_| {
                let token = token.clone();
                async move { delivery.sync_next(&token).await }
            })
            .await
    }
}

fn absorb_page(snapshot: &mut SpaceSnapshot, page: SyncPage) {
    for item in page.items {
        match item {
            SyncItem::Entry(entry) => snapshot.entries.push(entry),
            SyncItem::Asset(asset) => snapshot.assets.push(asset),
            SyncItem::DeletedEntry(sys) => snapshot.deleted_entries.push(sys),
            SyncItem::DeletedAsset(sys) => snapshot.deleted_assets.push(sys),
        }
    }
}
