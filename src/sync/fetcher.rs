use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::SyncError;
use crate::marketplace::executor::RequestError;
use crate::marketplace::Marketplace;
use crate::model::{Account, Card, Nomenclature, Outcome};

/// A root to query, with the brand recorded for it in the source mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootTarget {
    pub root: i64,
    pub original_brand: Option<String>,
}

#[derive(Debug, Default)]
pub struct FetchReport {
    pub cards: Vec<Card>,
    pub errors: Vec<String>,
}

impl FetchReport {
    pub fn merge(&mut self, other: FetchReport) {
        self.cards.extend(other.cards);
        self.errors.extend(other.errors);
    }
}

pub struct CardFetcher<'a> {
    market: &'a dyn Marketplace,
    page_size: u32,
    pause: Duration,
}

impl<'a> CardFetcher<'a> {
    pub fn new(market: &'a dyn Marketplace, page_size: u32, pause: Duration) -> Self {
        Self {
            market,
            page_size,
            pause,
        }
    }

    /// Distinct, well-formed roots of an account's mappings in mapping order.
    /// When `listed` is given, roots absent from it are dropped.
    pub fn mapped_roots(
        account: &Account,
        mappings: &[Nomenclature],
        listed: Option<&HashSet<i64>>,
    ) -> Vec<RootTarget> {
        let mut order: Vec<i64> = Vec::new();
        let mut by_root: HashMap<i64, Option<String>> = HashMap::new();
        for nom in mappings {
            let root = match nom.root_id.trim().parse::<i64>() {
                Ok(r) => r,
                Err(_) => {
                    warn!(account = %account.name, article = %nom.article, root_id = %nom.root_id, "skipping malformed root id");
                    continue;
                }
            };
            if let Some(set) = listed {
                if !set.contains(&root) {
                    debug!(account = %account.name, root, "root not in catalog; skipped");
                    continue;
                }
            }
            match by_root.get_mut(&root) {
                Some(existing) => {
                    if existing.is_none() {
                        *existing = nom.original_brand.clone();
                    }
                }
                None => {
                    order.push(root);
                    by_root.insert(root, nom.original_brand.clone());
                }
            }
        }
        order
            .into_iter()
            .map(|root| RootTarget {
                root,
                original_brand: by_root.remove(&root).flatten(),
            })
            .collect()
    }

    pub async fn fetch(
        &self,
        account: &Account,
        mappings: &[Nomenclature],
        listed: Option<&HashSet<i64>>,
    ) -> Result<FetchReport, SyncError> {
        let targets = Self::mapped_roots(account, mappings, listed);
        self.fetch_roots(account, &targets).await
    }

    /// Query every target once, in order. Authorization failure aborts;
    /// anti-automation exhaustion yields nothing for that root; any other
    /// failure is recorded and the walk continues.
    #[instrument(skip_all, fields(account = %account.name, roots = targets.len()))]
    pub async fn fetch_roots(
        &self,
        account: &Account,
        targets: &[RootTarget],
    ) -> Result<FetchReport, SyncError> {
        let mut report = FetchReport::default();
        if account.credential.trim().is_empty() {
            warn!("account has no credential; skipping");
            return Ok(report);
        }
        let mut seen: HashSet<i64> = HashSet::new();
        let mut first = true;
        for target in targets {
            if !seen.insert(target.root) {
                continue;
            }
            if !first && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
            first = false;

            match self
                .market
                .list_cards(&account.credential, target.root, self.page_size)
                .await
            {
                Ok(raw) => {
                    debug!(root = target.root, count = raw.len(), "cards fetched");
                    report.cards.extend(raw.into_iter().map(|c| Card {
                        nm_id: c.nm_id,
                        root: target.root,
                        brand: c.brand,
                        payload: c.rest,
                        credential: account.credential.clone(),
                        account_id: account.id,
                        original_brand: target.original_brand.clone(),
                        outcome: Outcome::Unchanged,
                    }));
                }
                Err(RequestError::Unauthorized) => {
                    return Err(SyncError::Unauthorized {
                        account: account.name.clone(),
                    });
                }
                Err(RequestError::Blocked { attempts }) => {
                    warn!(root = target.root, attempts, "blocked while fetching cards; no data");
                }
                Err(err) => {
                    warn!(root = target.root, error = %err, "card fetch failed");
                    report
                        .errors
                        .push(format!("{}: root {}: {}", account.name, target.root, err));
                }
            }
        }
        info!(cards = report.cards.len(), errors = report.errors.len(), "fetch done");
        Ok(report)
    }
}
