//! Delivery API client (published content and the sync feed).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::http::{self, ClientSettings};
use super::{DeliveryApi, SyncItem, SyncPage};
use crate::errors::{ApiError, ApiErrorKind, RequestInfo};
use crate::models::{Asset, Entry, Space, Sys};

/// Raw sync response body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncResponse {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    next_page_url: Option<String>,
    #[serde(default)]
    next_sync_url: Option<String>,
}

/// Asynchronous delivery API client bound to one space.
#[derive(Clone)]
pub struct DeliveryClient {
    http: reqwest::Client,
    base_url: String,
    space_id: String,
    token: String,
}

impl DeliveryClient {
    pub fn new(
        settings: &ClientSettings,
        space_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let http = settings.build_http("application/json")?;
        let base_url = settings.base_url();
        let space_id = space_id.into();
        info!(base_url = %base_url, space_id = %space_id, "created DeliveryClient");
        Ok(Self {
            http,
            base_url,
            space_id,
            token: token.into(),
        })
    }

    fn space_path(&self) -> String {
        format!("/spaces/{}", self.space_id)
    }

    async fn fetch_sync(&self, query: &[(&str, &str)]) -> Result<SyncPage, ApiError> {
        let path = format!("{}/sync", self.space_path());
        let request = RequestInfo::new("GET", path.clone());
        let url = format!("{}{}", self.base_url, path);
        let builder = self.http.get(&url).bearer_auth(&self.token).query(query);
        let body: SyncResponse = http::send_json(request.clone(), builder).await?;
        let page = parse_sync_response(body).map_err(|detail| {
            ApiError::new(request, ApiErrorKind::Parse(detail))
        })?;
        debug!(
            items = page.items.len(),
            more = page.next_page_token.is_some(),
            "fetched sync page"
        );
        Ok(page)
    }
}

#[async_trait]
impl DeliveryApi for DeliveryClient {
    #[instrument(skip(self), fields(space = %self.space_id))]
    async fn space(&self) -> Result<Space, ApiError> {
        let path = self.space_path();
        let url = format!("{}{}", self.base_url, path);
        let builder = self.http.get(&url).bearer_auth(&self.token);
        http::send_json(RequestInfo::new("GET", path), builder).await
    }

    #[instrument(skip(self), fields(space = %self.space_id))]
    async fn sync_initial(&self) -> Result<SyncPage, ApiError> {
        self.fetch_sync(&[("initial", "true")]).await
    }

    #[instrument(skip(self, token), fields(space = %self.space_id))]
    async fn sync_next(&self, token: &str) -> Result<SyncPage, ApiError> {
        self.fetch_sync(&[("sync_token", token)]).await
    }
}

fn parse_sync_response(body: SyncResponse) -> Result<SyncPage, String> {
    let mut items = Vec::with_capacity(body.items.len());
    for raw in body.items {
        let kind = raw
            .pointer("/sys/type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let parsed = match kind.as_str() {
            "Entry" => serde_json::from_value::<Entry>(raw).map(SyncItem::Entry),
            "Asset" => serde_json::from_value::<Asset>(raw).map(SyncItem::Asset),
            "DeletedEntry" => serde_json::from_value::<DeletedItem>(raw)
                .map(|d| SyncItem::DeletedEntry(d.sys)),
            "DeletedAsset" => serde_json::from_value::<DeletedItem>(raw)
                .map(|d| SyncItem::DeletedAsset(d.sys)),
            other => {
                debug!(kind = other, "skipping unsupported sync item");
                continue;
            }
        };
        items.push(parsed.map_err(|e| format!("invalid {} item: {}", kind, e))?);
    }

    let next_page_token = match body.next_page_url {
        Some(url) => Some(token_from_url(&url)?),
        None => None,
    };
    let next_sync_token = match body.next_sync_url {
        Some(url) => Some(token_from_url(&url)?),
        None => None,
    };

    Ok(SyncPage {
        items,
        next_page_token,
        next_sync_token,
    })
}

#[derive(Debug, Deserialize)]
struct DeletedItem {
    sys: Sys,
}

/// Extract the `sync_token` query parameter from a next-page/next-sync URL.
pub(crate) fn token_from_url(url: &str) -> Result<String, String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid sync url '{}': {}", url, e))?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "sync_token")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| format!("sync url '{}' has no sync_token", url))
}
