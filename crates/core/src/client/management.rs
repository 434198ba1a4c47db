//! Management API client (read and write access to a space).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use super::http::{self, ClientSettings};
use super::{Collection, ManagementApi, PutRequest, Query};
use crate::errors::{ApiError, RequestInfo};
use crate::models::{Asset, ContentType, Entry, EntityKind, Locale, Space, Sys};

const MANAGEMENT_MEDIA_TYPE: &str = "application/vnd.contentful.management.v1+json";
const VERSION_HEADER: &str = "X-Contentful-Version";
const CONTENT_TYPE_HEADER: &str = "X-Contentful-Content-Type";

/// Asynchronous management API client bound to one space.
#[derive(Clone)]
pub struct ManagementClient {
    http: reqwest::Client,
    base_url: String,
    space_id: String,
    token: String,
}

#[derive(serde::Deserialize)]
struct SysOnly {
    sys: Sys,
}

impl ManagementClient {
    pub fn new(
        settings: &ClientSettings,
        space_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let http = settings.build_http(MANAGEMENT_MEDIA_TYPE)?;
        let base_url = settings.base_url();
        let space_id = space_id.into();
        info!(base_url = %base_url, space_id = %space_id, "created ManagementClient");
        Ok(Self {
            http,
            base_url,
            space_id,
            token: token.into(),
        })
    }

    fn path(&self, suffix: &str) -> String {
        format!("/spaces/{}{}", self.space_id, suffix)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, MANAGEMENT_MEDIA_TYPE)
    }

    async fn list<T: DeserializeOwned>(
        &self,
        kind: EntityKind,
        query: &Query,
    ) -> Result<Collection<T>, ApiError> {
        let path = self.path(&format!("/{}", kind.collection()));
        let mut params = vec![
            ("skip".to_string(), query.skip.to_string()),
            ("limit".to_string(), query.limit.to_string()),
        ];
        if let Some(ids) = &query.ids {
            params.push(("sys.id[in]".to_string(), ids.join(",")));
        }
        let builder = self.request(reqwest::Method::GET, &path).query(&params);
        let page: Collection<T> =
            http::send_json(RequestInfo::new("GET", path), builder).await?;
        debug!(
            kind = %kind,
            count = page.items.len(),
            total = page.total,
            skip = query.skip,
            "fetched collection page"
        );
        Ok(page)
    }

    fn entity_path(&self, kind: EntityKind, id: &str) -> String {
        self.path(&format!("/{}/{}", kind.collection(), id))
    }
}

#[async_trait]
impl ManagementApi for ManagementClient {
    #[instrument(skip(self), fields(space = %self.space_id))]
    async fn space(&self) -> Result<Space, ApiError> {
        let path = self.path("");
        let builder = self.request(reqwest::Method::GET, &path);
        http::send_json(RequestInfo::new("GET", path), builder).await
    }

    #[instrument(skip(self), fields(space = %self.space_id))]
    async fn content_types(&self, query: &Query) -> Result<Collection<ContentType>, ApiError> {
        self.list(EntityKind::ContentType, query).await
    }

    #[instrument(skip(self), fields(space = %self.space_id))]
    async fn locales(&self, query: &Query) -> Result<Collection<Locale>, ApiError> {
        self.list(EntityKind::Locale, query).await
    }

    #[instrument(skip(self, query), fields(space = %self.space_id, skip = query.skip))]
    async fn entries(&self, query: &Query) -> Result<Collection<Entry>, ApiError> {
        self.list(EntityKind::Entry, query).await
    }

    #[instrument(skip(self, query), fields(space = %self.space_id, skip = query.skip))]
    async fn assets(&self, query: &Query) -> Result<Collection<Asset>, ApiError> {
        self.list(EntityKind::Asset, query).await
    }

    #[instrument(skip(self), fields(space = %self.space_id))]
    async fn fetch_sys(&self, kind: EntityKind, id: &str) -> Result<Option<Sys>, ApiError> {
        let path = self.entity_path(kind, id);
        let builder = self.request(reqwest::Method::GET, &path);
        match http::send_json::<SysOnly>(RequestInfo::new("GET", path), builder).await {
            Ok(found) => Ok(Some(found.sys)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, request), fields(space = %self.space_id, id = ?request.id))]
    async fn put(&self, kind: EntityKind, request: &PutRequest) -> Result<Sys, ApiError> {
        let (method, path) = match &request.id {
            Some(id) => (reqwest::Method::PUT, self.entity_path(kind, id)),
            None => (
                reqwest::Method::POST,
                self.path(&format!("/{}", kind.collection())),
            ),
        };
        let info = RequestInfo::new(method.as_str(), path.clone());
        let mut builder = self.request(method, &path).json(&request.body);
        if let Some(version) = request.version {
            builder = builder.header(VERSION_HEADER, version);
        }
        if let Some(content_type) = &request.content_type {
            builder = builder.header(CONTENT_TYPE_HEADER, content_type);
        }
        let written: SysOnly = http::send_json(info, builder).await?;
        debug!(kind = %kind, id = %written.sys.id, version = ?written.sys.version, "wrote entity");
        Ok(written.sys)
    }

    #[instrument(skip(self), fields(space = %self.space_id))]
    async fn publish(&self, kind: EntityKind, id: &str, version: u64) -> Result<Sys, ApiError> {
        let path = format!("{}/published", self.entity_path(kind, id));
        let builder = self
            .request(reqwest::Method::PUT, &path)
            .header(VERSION_HEADER, version);
        let published: SysOnly = http::send_json(RequestInfo::new("PUT", path), builder).await?;
        Ok(published.sys)
    }

    #[instrument(skip(self), fields(space = %self.space_id))]
    async fn unpublish(&self, kind: EntityKind, id: &str, version: u64) -> Result<Sys, ApiError> {
        let path = format!("{}/published", self.entity_path(kind, id));
        let builder = self
            .request(reqwest::Method::DELETE, &path)
            .header(VERSION_HEADER, version);
        let unpublished: SysOnly =
            http::send_json(RequestInfo::new("DELETE", path), builder).await?;
        Ok(unpublished.sys)
    }

    #[instrument(skip(self), fields(space = %self.space_id))]
    async fn delete(&self, kind: EntityKind, id: &str, version: Option<u64>) -> Result<(), ApiError> {
        let path = self.entity_path(kind, id);
        let mut builder = self.request(reqwest::Method::DELETE, &path);
        if let Some(version) = version {
            builder = builder.header(VERSION_HEADER, version);
        }
        http::send_empty(RequestInfo::new("DELETE", path), builder).await
    }

    #[instrument(skip(self), fields(space = %self.space_id))]
    async fn process_asset(&self, id: &str, version: u64, locale: &str) -> Result<(), ApiError> {
        let path = format!(
            "{}/files/{}/process",
            self.entity_path(EntityKind::Asset, id),
            locale
        );
        let builder = self
            .request(reqwest::Method::PUT, &path)
            .header(VERSION_HEADER, version);
        http::send_empty(RequestInfo::new("PUT", path), builder).await
    }

    #[instrument(skip(self), fields(space = %self.space_id))]
    async fn asset(&self, id: &str) -> Result<Asset, ApiError> {
        let path = self.entity_path(EntityKind::Asset, id);
        let builder = self.request(reqwest::Method::GET, &path);
        http::send_json(RequestInfo::new("GET", path), builder).await
    }
}
