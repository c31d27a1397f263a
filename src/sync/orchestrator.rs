use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use tracing::{error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use super::fetcher::{CardFetcher, FetchReport, RootTarget};
use super::paginator::Paginator;
use super::reconcile::{reconcile, restore_original, Reconciliation};
use super::updater::{BatchUpdater, UpdateReport};
use super::{SyncError, SyncSettings};
use crate::db::Store;
use crate::marketplace::Marketplace;
use crate::model::{Account, Card, FlowKind, Mode, Nomenclature, Outcome};
use crate::notify::Notifier;

/// Weekday or rest day for `today`, unless the caller forces one.
pub async fn resolve_mode(
    store: &dyn Store,
    forced: Option<Mode>,
    today: NaiveDate,
) -> Result<Mode, SyncError> {
    if let Some(mode) = forced {
        return Ok(mode);
    }
    Ok(if store.is_rest_day(today).await? {
        Mode::RestDay
    } else {
        Mode::Weekday
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub flow: FlowKind,
    pub mode: Option<Mode>,
    pub fetched: usize,
    pub changed: usize,
    pub submitted: usize,
    pub failed: usize,
    pub repaired: usize,
    pub messages: Vec<String>,
    pub errors: Vec<String>,
}

impl RunReport {
    fn new(flow: FlowKind, mode: Option<Mode>) -> Self {
        Self {
            flow,
            mode,
            fetched: 0,
            changed: 0,
            submitted: 0,
            failed: 0,
            repaired: 0,
            messages: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        let mode = self.mode.map(|m| format!(" ({})", m.as_str())).unwrap_or_default();
        format!(
            "{}{}: fetched {}, changed {}, submitted {}, failed {}, repaired {}, errors {}",
            self.flow.as_str(),
            mode,
            self.fetched,
            self.changed,
            self.submitted,
            self.failed,
            self.repaired,
            self.errors.len()
        )
    }

    /// Summary first, then errors, then informational notes.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(1 + self.errors.len() + self.messages.len());
        out.push(self.summary());
        out.extend(self.errors.iter().map(|e| format!("error: {}", e)));
        out.extend(self.messages.iter().cloned());
        out
    }

    fn absorb_fetch(&mut self, fetch: &FetchReport) {
        self.fetched += fetch.cards.len();
        self.errors.extend(fetch.errors.iter().cloned());
    }

    fn absorb_decision(&mut self, decision: Reconciliation) {
        self.changed += decision.changed;
        let mut seen: HashSet<String> = self.messages.iter().cloned().collect();
        for msg in decision.messages {
            if seen.insert(msg.clone()) {
                self.messages.push(msg);
            }
        }
    }

    fn absorb_update(&mut self, update: UpdateReport) {
        self.submitted += update.submitted;
        self.failed += update.failed;
        self.errors.extend(update.errors);
    }
}

/// Roots an account still lists under a brand that should have moved.
struct Stale<'a> {
    account: &'a Account,
    mappings: &'a [Nomenclature],
    brand_ids: Vec<i64>,
    roots: Vec<i64>,
}

pub struct Orchestrator<'a> {
    store: &'a dyn Store,
    market: &'a dyn Marketplace,
    notifier: &'a dyn Notifier,
    settings: SyncSettings,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a dyn Store,
        market: &'a dyn Marketplace,
        notifier: &'a dyn Notifier,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            market,
            notifier,
            settings,
        }
    }

    fn paginator(&self) -> Paginator<'a> {
        Paginator::new(self.market, self.settings.page_pause)
    }

    fn fetcher(&self) -> CardFetcher<'a> {
        CardFetcher::new(self.market, self.settings.card_page_size, self.settings.card_pause)
    }

    fn updater(&self) -> BatchUpdater<'a> {
        BatchUpdater::new(
            self.market,
            self.settings.batch_limit,
            self.settings.batch_pause,
            self.settings.update_fields.clone(),
        )
    }

    async fn cooldown(&self) {
        let d = self.settings.repair_cooldown;
        if !d.is_zero() {
            info!(seconds = d.as_secs(), "cooling down before catalog check");
            tokio::time::sleep(d).await;
        }
    }

    /// Run one flow end to end and hand the outcome to the notifier.
    /// Only an authorization or store failure comes back as an error.
    pub async fn run(&self, flow: FlowKind, mode: Mode) -> Result<RunReport, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, flow = flow.as_str());
        async move {
            info!("run started");
            let result = match flow {
                FlowKind::Outbound => self.run_outbound(mode).await,
                FlowKind::Inbound => self.run_inbound().await,
            };
            let lines = match &result {
                Ok(report) => {
                    info!(summary = %report.summary(), "run finished");
                    report.lines()
                }
                Err(err) => {
                    error!(error = %err, "run aborted");
                    vec![format!("{} run aborted: {}", flow.as_str(), err)]
                }
            };
            if let Err(err) = self.notifier.deliver(&lines).await {
                warn!(error = %err, "report delivery failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Default brand outward, followed by a single repair pass.
    #[instrument(skip_all, fields(mode = mode.as_str()))]
    pub async fn run_outbound(&self, mode: Mode) -> Result<RunReport, SyncError> {
        let mut report = RunReport::new(FlowKind::Outbound, Some(mode));
        let accounts = self.store.list_accounts_with_mappings().await?;

        let fetcher = self.fetcher();
        let mut fetched = FetchReport::default();
        for (account, mappings) in &accounts {
            fetched.merge(fetcher.fetch(account, mappings, None).await?);
        }
        report.absorb_fetch(&fetched);

        let policies = self.resolve_policies(&fetched.cards).await?;
        let mut cards = fetched.cards;
        report.absorb_decision(reconcile(&mut cards, mode, &policies));
        let mut pending = take_changed(cards);
        report.absorb_update(self.updater().submit(&mut pending).await?);

        self.repair(mode, &accounts, &policies, &mut report).await?;
        Ok(report)
    }

    async fn repair(
        &self,
        mode: Mode,
        accounts: &[(Account, Vec<Nomenclature>)],
        policies: &HashMap<String, Account>,
        report: &mut RunReport,
    ) -> Result<(), SyncError> {
        let checkable: Vec<_> = accounts
            .iter()
            .filter(|(a, _)| a.supplier_id.is_some())
            .map(|(a, m)| (a, m.as_slice(), a.brand_ids_to_vacate(mode)))
            .filter(|(a, _, ids)| {
                if ids.is_empty() {
                    info!(account = %a.name, "no brands to check after submit");
                }
                !ids.is_empty()
            })
            .collect();
        if checkable.is_empty() {
            return Ok(());
        }

        self.cooldown().await;
        let pager = self.paginator();
        let mut stale: Vec<Stale<'_>> = Vec::new();
        for (account, mappings, brand_ids) in checkable {
            let roots = still_listed(&pager, account, &brand_ids).await;
            if roots.is_empty() {
                continue;
            }
            info!(account = %account.name, roots = roots.len(), "roots still listed; repairing");
            stale.push(Stale {
                account,
                mappings,
                brand_ids,
                roots,
            });
        }
        if stale.is_empty() {
            info!("catalog consistent after submit");
            return Ok(());
        }

        let fetcher = self.fetcher();
        let mut fetched = FetchReport::default();
        for s in &stale {
            let originals: HashMap<i64, Option<String>> =
                CardFetcher::mapped_roots(s.account, s.mappings, None)
                    .into_iter()
                    .map(|t| (t.root, t.original_brand))
                    .collect();
            let targets: Vec<RootTarget> = s
                .roots
                .iter()
                .map(|&root| RootTarget {
                    root,
                    original_brand: originals.get(&root).cloned().flatten(),
                })
                .collect();
            fetched.merge(fetcher.fetch_roots(s.account, &targets).await?);
        }
        report.errors.extend(fetched.errors);

        let mut cards = fetched.cards;
        let mut policies = policies.clone();
        for s in &stale {
            policies
                .entry(s.account.credential.clone())
                .or_insert_with(|| s.account.clone());
        }
        let decision = reconcile(&mut cards, mode, &policies);
        let mut pending = take_changed(cards);
        let update = self.updater().submit(&mut pending).await?;
        report.repaired += update.submitted;
        report.changed += decision.changed;
        report.failed += update.failed;
        report.errors.extend(update.errors);

        self.cooldown().await;
        for s in &stale {
            let expected: HashSet<i64> = s.roots.iter().copied().collect();
            for root in still_listed(&pager, s.account, &s.brand_ids).await {
                if expected.contains(&root) {
                    warn!(account = %s.account.name, root, "root still inconsistent after repair");
                    report.errors.push(format!(
                        "{}: root {} still listed under a brand that should have moved",
                        s.account.name, root
                    ));
                }
            }
        }
        Ok(())
    }

    /// Recorded original brand back onto every currently listed mapped root.
    #[instrument(skip_all)]
    pub async fn run_inbound(&self) -> Result<RunReport, SyncError> {
        let mut report = RunReport::new(FlowKind::Inbound, None);
        let accounts = self.store.list_accounts_with_mappings().await?;

        let pager = self.paginator();
        let mut listed: HashSet<i64> = HashSet::new();
        for (account, _) in &accounts {
            listed.extend(pager.list_all(account, &[]).await.into_iter().map(|e| e.root));
        }
        info!(roots = listed.len(), "catalog roots listed");

        let fetcher = self.fetcher();
        let mut fetched = FetchReport::default();
        for (account, mappings) in &accounts {
            fetched.merge(fetcher.fetch(account, mappings, Some(&listed)).await?);
        }
        report.absorb_fetch(&fetched);

        let mut cards = fetched.cards;
        report.absorb_decision(restore_original(&mut cards));
        let mut pending = take_changed(cards);
        report.absorb_update(self.updater().submit(&mut pending).await?);
        Ok(report)
    }

    /// Owning account of every distinct credential among `cards`.
    pub async fn resolve_policies(
        &self,
        cards: &[Card],
    ) -> Result<HashMap<String, Account>, SyncError> {
        let mut out = HashMap::new();
        for card in cards {
            if out.contains_key(&card.credential) {
                continue;
            }
            match self.store.account_by_credential(&card.credential).await? {
                Some(account) => {
                    out.insert(card.credential.clone(), account);
                }
                None => warn!(nm_id = card.nm_id, "no account for card credential"),
            }
        }
        Ok(out)
    }
}

fn take_changed(cards: Vec<Card>) -> Vec<Card> {
    cards
        .into_iter()
        .filter(|c| c.outcome == Outcome::Changed)
        .collect()
}

/// Distinct roots the catalog still shows under any of `brand_ids`.
async fn still_listed(pager: &Paginator<'_>, account: &Account, brand_ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    pager
        .list_all(account, brand_ids)
        .await
        .into_iter()
        .filter(|e| e.brand_id.map_or(true, |id| brand_ids.contains(&id)))
        .map(|e| e.root)
        .filter(|r| seen.insert(*r))
        .collect()
}
