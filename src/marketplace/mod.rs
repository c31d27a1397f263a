//! Marketplace HTTP surface: catalog listing, content list and content update.
//!
//! Everything goes through [`executor::Executor`], which owns retries and
//! pacing. The sync engine only sees the [`Marketplace`] trait so tests can
//! substitute a recording fake.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::CatalogEntry;

pub mod backoff;
pub mod executor;
pub mod model;
pub mod rate_limit;

use executor::{ApiRequest, Executor, ReqwestTransport, RequestError};
use model::{CardsListResp, CatalogResp, RawCard};

const CARDS_LIST_PATH: &str = "content/v2/get/cards/list";
const CARDS_UPDATE_PATH: &str = "content/v2/cards/update";

/// Base URLs. Catalog URLs carry their fixed query string; page, supplier and
/// brand filter are appended per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub content_api: String,
    pub catalog: String,
    pub mirror_catalog: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogSource {
    Primary,
    Mirror,
}

#[async_trait]
pub trait Marketplace: Send + Sync {
    /// One page of the public catalog for `supplier_id`. An empty vector ends pagination.
    async fn catalog_page(
        &self,
        source: CatalogSource,
        supplier_id: i64,
        page: u32,
        brand_ids: &[i64],
    ) -> Result<Vec<CatalogEntry>, RequestError>;

    /// Content cards grouped under `root`.
    async fn list_cards(
        &self,
        credential: &str,
        root: i64,
        limit: u32,
    ) -> Result<Vec<RawCard>, RequestError>;

    /// Submit one batch of already-projected card payloads.
    async fn update_cards(&self, credential: &str, cards: &[Value]) -> Result<(), RequestError>;
}

pub struct MarketplaceClient {
    executor: Arc<Executor>,
    content_api: Url,
    catalog: Url,
    mirror_catalog: Url,
}

impl fmt::Debug for MarketplaceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketplaceClient")
            .field("content_api", &self.content_api.as_str())
            .field("catalog", &self.catalog.as_str())
            .finish_non_exhaustive()
    }
}

impl MarketplaceClient {
    pub fn new(executor: Arc<Executor>, endpoints: &Endpoints) -> anyhow::Result<Self> {
        Ok(Self {
            executor,
            content_api: base_url(&endpoints.content_api)?,
            catalog: Url::parse(&endpoints.catalog)?,
            mirror_catalog: Url::parse(&endpoints.mirror_catalog)?,
        })
    }

    /// Build the production client: reqwest transport, rate limits and retry policy from config.
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(
            &cfg.marketplace.user_agent,
            std::time::Duration::from_secs(cfg.marketplace.timeout_seconds),
        )?;
        let executor = Executor::new(Arc::new(transport), cfg.rate_limit(), cfg.retry_policy());
        Self::new(Arc::new(executor), &cfg.endpoints())
    }

    pub fn catalog_url(
        &self,
        source: CatalogSource,
        supplier_id: i64,
        page: u32,
        brand_ids: &[i64],
    ) -> Url {
        let mut url = match source {
            CatalogSource::Primary => self.catalog.clone(),
            CatalogSource::Mirror => self.mirror_catalog.clone(),
        };
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("page", &page.to_string());
            q.append_pair("supplier", &supplier_id.to_string());
            if !brand_ids.is_empty() {
                let joined = brand_ids
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(";");
                q.append_pair("fbrand", &joined);
            }
        }
        url
    }

    fn content_url(&self, path: &str) -> Result<Url, RequestError> {
        self.content_api
            .join(path)
            .map_err(|e| RequestError::Decode(format!("invalid content API URL: {}", e)))
    }
}

/// Parse a base URL that relative paths get joined onto. A missing trailing
/// slash would make `join` drop the last path segment.
fn base_url(raw: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

pub fn build_cards_list_body(root: i64, limit: u32) -> Value {
    json!({
        "settings": {
            "cursor": { "limit": limit },
            "filter": { "withPhoto": -1, "imtID": root }
        }
    })
}

/// The update endpoint acknowledges with `{"error": bool, "errorText": ...}`.
fn check_update_ack(ack: &Value) -> Result<(), RequestError> {
    if ack.get("error").and_then(Value::as_bool).unwrap_or(false) {
        let text = ack
            .get("errorText")
            .and_then(Value::as_str)
            .unwrap_or("unspecified error");
        let extra = ack
            .get("additionalErrors")
            .filter(|v| !v.is_null())
            .map(|v| format!(" ({})", v))
            .unwrap_or_default();
        return Err(RequestError::Rejected(format!("{}{}", text, extra)));
    }
    Ok(())
}

#[async_trait]
impl Marketplace for MarketplaceClient {
    async fn catalog_page(
        &self,
        source: CatalogSource,
        supplier_id: i64,
        page: u32,
        brand_ids: &[i64],
    ) -> Result<Vec<CatalogEntry>, RequestError> {
        let url = self.catalog_url(source, supplier_id, page, brand_ids);
        let request = ApiRequest::get(url).header("Accept", "application/json");
        let value = self.executor.execute(&request).await?;
        let resp: CatalogResp = if value.is_null() {
            CatalogResp::default()
        } else {
            serde_json::from_value(value).map_err(|e| RequestError::Decode(e.to_string()))?
        };
        let entries: Vec<CatalogEntry> = resp
            .into_products()
            .into_iter()
            .filter_map(|p| {
                let Some(root) = p.root else {
                    warn!(supplier_id, page, nm_id = ?p.id, "catalog product without root; skipped");
                    return None;
                };
                Some(CatalogEntry {
                    root,
                    nm_id: p.id,
                    brand: p.brand,
                    brand_id: p.brand_id,
                    supplier_id,
                })
            })
            .collect();
        debug!(supplier_id, page, ?source, count = entries.len(), "catalog page");
        Ok(entries)
    }

    async fn list_cards(
        &self,
        credential: &str,
        root: i64,
        limit: u32,
    ) -> Result<Vec<RawCard>, RequestError> {
        let url = self.content_url(CARDS_LIST_PATH)?;
        let request = ApiRequest::post(url, build_cards_list_body(root, limit))
            .header("Authorization", credential);
        let value = self.executor.execute(&request).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        let resp: CardsListResp =
            serde_json::from_value(value).map_err(|e| RequestError::Decode(e.to_string()))?;
        Ok(resp.cards)
    }

    async fn update_cards(&self, credential: &str, cards: &[Value]) -> Result<(), RequestError> {
        let url = self.content_url(CARDS_UPDATE_PATH)?;
        let request = ApiRequest::post(url, Value::Array(cards.to_vec()))
            .header("Authorization", credential);
        let ack = self.executor.execute(&request).await?;
        check_update_ack(&ack)?;
        info!(count = cards.len(), "cards updated");
        Ok(())
    }
}
