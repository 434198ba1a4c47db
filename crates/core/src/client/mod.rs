//! Content API clients.
//!
//! The sync pipeline only talks to the [`DeliveryApi`] and [`ManagementApi`]
//! traits; [`DeliveryClient`] and [`ManagementClient`] are the reqwest-backed
//! implementations. Every trait method maps to exactly one HTTP request, so
//! callers can rate-limit and retry per call.

pub mod delivery;
pub mod http;
pub mod management;

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ApiError;
use crate::models::{Asset, ContentType, Entry, EntityKind, Locale, Space, Sys};
use crate::rate_limit::RequestScheduler;

pub use delivery::DeliveryClient;
pub use http::ClientSettings;
pub use management::ManagementClient;

/// Default and maximum page size used for collection queries.
pub const PAGE_SIZE: usize = 100;

/// A paged collection query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub skip: usize,
    pub limit: usize,
    /// Restrict to these `sys.id`s.
    pub ids: Option<Vec<String>>,
}

impl Query {
    pub fn page(skip: usize) -> Self {
        Self {
            skip,
            limit: PAGE_SIZE,
            ids: None,
        }
    }

    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }
}

/// One page of a collection response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub limit: usize,
}

/// A create-or-update request.
#[derive(Debug, Clone, PartialEq)]
pub struct PutRequest {
    /// `None` lets the server assign the ID (locales).
    pub id: Option<String>,
    /// Current destination version; `None` creates.
    pub version: Option<u64>,
    /// Required when creating entries.
    pub content_type: Option<String>,
    pub body: Value,
}

/// One item of the sync feed.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncItem {
    Entry(Entry),
    Asset(Asset),
    DeletedEntry(Sys),
    DeletedAsset(Sys),
}

/// One page of the sync feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPage {
    pub items: Vec<SyncItem>,
    /// Present while more pages follow.
    pub next_page_token: Option<String>,
    /// Present on the last page.
    pub next_sync_token: Option<String>,
}

/// Read-only access to published source content.
#[async_trait]
pub trait DeliveryApi: Send + Sync {
    async fn space(&self) -> Result<Space, ApiError>;

    /// First page of a full sync.
    async fn sync_initial(&self) -> Result<SyncPage, ApiError>;

    /// A page continuing from a page token or a sync token.
    async fn sync_next(&self, token: &str) -> Result<SyncPage, ApiError>;
}

/// Read/write access to a space through the management API.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    async fn space(&self) -> Result<Space, ApiError>;

    async fn content_types(&self, query: &Query) -> Result<Collection<ContentType>, ApiError>;

    async fn locales(&self, query: &Query) -> Result<Collection<Locale>, ApiError>;

    async fn entries(&self, query: &Query) -> Result<Collection<Entry>, ApiError>;

    async fn assets(&self, query: &Query) -> Result<Collection<Asset>, ApiError>;

    /// Current system metadata of a single entity, `None` if it does not exist.
    async fn fetch_sys(&self, kind: EntityKind, id: &str) -> Result<Option<Sys>, ApiError>;

    async fn put(&self, kind: EntityKind, request: &PutRequest) -> Result<Sys, ApiError>;

    async fn publish(&self, kind: EntityKind, id: &str, version: u64) -> Result<Sys, ApiError>;

    async fn unpublish(&self, kind: EntityKind, id: &str, version: u64) -> Result<Sys, ApiError>;

    async fn delete(&self, kind: EntityKind, id: &str, version: Option<u64>) -> Result<(), ApiError>;

    /// Trigger processing of an asset file for one locale.
    async fn process_asset(&self, id: &str, version: u64, locale: &str) -> Result<(), ApiError>;

    async fn asset(&self, id: &str) -> Result<Asset, ApiError>;
}

/// Fetch every page of a collection, one scheduled request per page.
pub async fn fetch_all<T, F, Fut>(
    scheduler: &RequestScheduler,
    label: &str,
    base: Query,
    fetch: F,
) -> Result<Vec<T>, ApiError>
where
    F: Fn(Query) -> Fut,
    Fut: Future<Output = Result<Collection<T>, ApiError>>,
{
    let mut items = Vec::new();
    let mut skip = base.skip;
    loop {
        let query = Query {
            skip,
            ..base.clone()
        };
        let page = scheduler.call(label, |_| fetch(query.clone())).await?;
        let count = page.items.len();
        items.extend(page.items);
        skip += count;
        if count == 0 || skip >= page.total {
            break;
        }
    }
    Ok(items)
}
