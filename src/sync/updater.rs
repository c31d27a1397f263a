use std::time::Duration;
use tracing::{info, instrument, warn};

use super::SyncError;
use crate::marketplace::executor::RequestError;
use crate::marketplace::Marketplace;
use crate::model::{mask_credential, Card, Outcome};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub batches: usize,
    pub submitted: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Sequential writer for changed cards.
pub struct BatchUpdater<'a> {
    market: &'a dyn Marketplace,
    batch_limit: usize,
    pause: Duration,
    fields: Vec<String>,
}

impl<'a> BatchUpdater<'a> {
    pub fn new(
        market: &'a dyn Marketplace,
        batch_limit: usize,
        pause: Duration,
        fields: Vec<String>,
    ) -> Self {
        Self {
            market,
            batch_limit: batch_limit.max(1),
            pause,
            fields,
        }
    }

    /// Group `cards` by credential (first-seen order), chunk each group under
    /// the batch ceiling and send the batches one after another. Each card's
    /// outcome is set from its batch result.
    #[instrument(skip_all, fields(cards = cards.len()))]
    pub async fn submit(&self, cards: &mut [Card]) -> Result<UpdateReport, SyncError> {
        let mut report = UpdateReport::default();

        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (idx, card) in cards.iter().enumerate() {
            if card.credential.is_empty() {
                warn!(nm_id = card.nm_id, "card without credential; not submitted");
                continue;
            }
            match groups.iter_mut().find(|(cred, _)| *cred == card.credential) {
                Some((_, members)) => members.push(idx),
                None => groups.push((card.credential.clone(), vec![idx])),
            }
        }
        if groups.is_empty() {
            info!("nothing to submit");
            return Ok(report);
        }

        let mut first = true;
        for (credential, members) in &groups {
            let masked = mask_credential(credential);
            let total = members.chunks(self.batch_limit).len();
            for (n, chunk) in members.chunks(self.batch_limit).enumerate() {
                if !first && !self.pause.is_zero() {
                    tokio::time::sleep(self.pause).await;
                }
                first = false;

                let payload: Vec<_> = chunk
                    .iter()
                    .map(|&i| cards[i].wire_payload(&self.fields))
                    .collect();
                report.batches += 1;
                info!(credential = %masked, batch = n + 1, of = total, size = chunk.len(), "submitting batch");

                let result = self.market.update_cards(credential, &payload).await;
                let outcome = match result {
                    Ok(()) => {
                        report.submitted += chunk.len();
                        Outcome::SubmittedOk
                    }
                    Err(RequestError::Unauthorized) => {
                        return Err(SyncError::Unauthorized { account: masked });
                    }
                    Err(err) => {
                        warn!(credential = %masked, batch = n + 1, error = %err, "batch failed");
                        report.failed += chunk.len();
                        report.errors.push(format!("{}: batch {}/{}: {}", masked, n + 1, total, err));
                        Outcome::SubmittedFailed
                    }
                };
                for &i in chunk {
                    cards[i].outcome = outcome;
                }
            }
        }
        info!(batches = report.batches, submitted = report.submitted, failed = report.failed, "submit done");
        Ok(report)
    }
}
