use futures::stream::{self, Stream, StreamExt};
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::marketplace::{CatalogSource, Marketplace};
use crate::model::{Account, CatalogEntry};

/// Hard stop in case the destination never returns an empty page.
const MAX_PAGES: u32 = 5_000;

/// Walks the public catalog page by page.
pub struct Paginator<'a> {
    market: &'a dyn Marketplace,
    pause: Duration,
}

impl<'a> Paginator<'a> {
    pub fn new(market: &'a dyn Marketplace, pause: Duration) -> Self {
        Self { market, pause }
    }

    /// Lazy walk of one catalog source. Pages are requested strictly in order,
    /// only as the stream is polled; every call starts again from page 1.
    /// The walk ends on the first empty page or on a failed request.
    pub fn walk<'b>(
        &self,
        source: CatalogSource,
        supplier_id: i64,
        brand_ids: &'b [i64],
    ) -> impl Stream<Item = CatalogEntry> + 'b
    where
        'a: 'b,
    {
        let market: &'b dyn Marketplace = self.market;
        let pause = self.pause;
        stream::unfold(Some(1u32), move |next| async move {
            let page = next?;
            if page > 1 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            match market.catalog_page(source, supplier_id, page, brand_ids).await {
                Ok(entries) if entries.is_empty() => None,
                Ok(entries) => {
                    let next = if page >= MAX_PAGES {
                        warn!(supplier_id, page, "catalog page limit reached; stopping");
                        None
                    } else {
                        Some(page + 1)
                    };
                    Some((stream::iter(entries), next))
                }
                Err(err) => {
                    warn!(supplier_id, page, ?source, error = %err, "catalog page failed; stopping walk");
                    None
                }
            }
        })
        .flatten()
    }

    /// Full listing for an account, optionally filtered to `brand_ids`.
    /// Falls back to the mirror catalog when the primary one yields nothing.
    #[instrument(skip_all, fields(account = %account.name))]
    pub async fn list_all(&self, account: &Account, brand_ids: &[i64]) -> Vec<CatalogEntry> {
        let Some(supplier_id) = account.supplier_id else {
            warn!("account has no catalog id; skipping listing");
            return Vec::new();
        };
        let primary: Vec<CatalogEntry> = self
            .walk(CatalogSource::Primary, supplier_id, brand_ids)
            .collect()
            .await;
        if !primary.is_empty() {
            info!(supplier_id, count = primary.len(), "catalog listed");
            return primary;
        }
        info!(supplier_id, "primary catalog empty; trying mirror");
        let mirror: Vec<CatalogEntry> = self
            .walk(CatalogSource::Mirror, supplier_id, brand_ids)
            .collect()
            .await;
        info!(supplier_id, count = mirror.len(), "mirror catalog listed");
        mirror
    }
}
