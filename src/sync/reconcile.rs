//! Brand decisions. No I/O: cards are inspected and rewritten in place.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::model::{Account, Card, Mode, Outcome};

/// Result of one decision sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub changed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    /// Informational notes, deduplicated by exact text, in first-seen order.
    pub messages: Vec<String>,
}

impl Reconciliation {
    fn note(&mut self, seen: &mut HashSet<String>, text: String) {
        if seen.insert(text.clone()) {
            self.messages.push(text);
        }
    }
}

/// Apply the account policy for `mode`. `accounts` is keyed by credential.
///
/// Weekday: anything not at the default brand moves to it.
/// Rest day: only cards carrying one of the account's night brands move to the
/// default; every other brand stays as it is.
///
/// A card already marked changed in this pass is never decided again.
pub fn reconcile(
    cards: &mut [Card],
    mode: Mode,
    accounts: &HashMap<String, Account>,
) -> Reconciliation {
    let mut out = Reconciliation::default();
    let mut seen_messages = HashSet::new();
    let mut changed_ids: HashSet<i64> = HashSet::new();

    for card in cards.iter_mut() {
        if card.outcome == Outcome::Changed || changed_ids.contains(&card.nm_id) {
            continue;
        }
        let Some(account) = accounts.get(&card.credential) else {
            warn!(nm_id = card.nm_id, root = card.root, "card credential matches no account; skipped");
            out.skipped += 1;
            continue;
        };
        let Some(default) = account.default_brand.as_deref().filter(|d| !d.is_empty()) else {
            warn!(account = %account.name, "account has no default brand; skipped");
            out.skipped += 1;
            continue;
        };

        if card.brand == default {
            out.unchanged += 1;
            out.note(
                &mut seen_messages,
                format!("root {}: brand already {}", card.root, default),
            );
            continue;
        }

        let should_move = match mode {
            Mode::Weekday => true,
            Mode::RestDay => account.night_brands().contains(card.brand.as_str()),
        };
        if !should_move {
            out.unchanged += 1;
            out.note(
                &mut seen_messages,
                format!("root {}: {} is not a night brand, untouched", card.root, card.brand),
            );
            continue;
        }

        debug!(nm_id = card.nm_id, from = %card.brand, to = default, "brand change");
        card.brand = default.to_string();
        card.outcome = Outcome::Changed;
        changed_ids.insert(card.nm_id);
        out.changed += 1;
    }
    out
}

/// Move every card back to the brand recorded in its source mapping.
/// Cards without a recorded brand are left alone.
pub fn restore_original(cards: &mut [Card]) -> Reconciliation {
    let mut out = Reconciliation::default();
    let mut seen_messages = HashSet::new();
    let mut changed_ids: HashSet<i64> = HashSet::new();

    for card in cards.iter_mut() {
        if card.outcome == Outcome::Changed || changed_ids.contains(&card.nm_id) {
            continue;
        }
        let Some(original) = card.original_brand.clone().filter(|b| !b.is_empty()) else {
            warn!(nm_id = card.nm_id, root = card.root, "no original brand recorded; skipped");
            out.skipped += 1;
            out.note(
                &mut seen_messages,
                format!("root {}: no original brand recorded", card.root),
            );
            continue;
        };
        if card.brand == original {
            out.unchanged += 1;
            continue;
        }
        debug!(nm_id = card.nm_id, from = %card.brand, to = %original, "brand restore");
        card.brand = original;
        card.outcome = Outcome::Changed;
        changed_ids.insert(card.nm_id);
        out.changed += 1;
    }
    out
}
