use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// A brand known for an account, with its marketplace-assigned id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrandPolicy {
    pub id: i64,
    pub name: String,
    pub marketplace_id: i64,
    pub is_daytime: bool,
    pub account_id: i64,
}

/// Seller identity as stored by the persistence layer. Read-only to the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub credential: String,
    /// Public catalog id; accounts without one are skipped by catalog walks.
    pub supplier_id: Option<i64>,
    pub cabinet_order: Option<i64>,
    pub default_brand: Option<String>,
    pub brands: Vec<BrandPolicy>,
}

impl Account {
    /// Names allowed to stay active outside business days.
    pub fn night_brands(&self) -> BTreeSet<&str> {
        self.brands
            .iter()
            .filter(|b| !b.is_daytime)
            .map(|b| b.name.as_str())
            .collect()
    }

    /// Marketplace brand ids that should no longer be listed once `mode` has
    /// been applied. The default brand is never included.
    pub fn brand_ids_to_vacate(&self, mode: Mode) -> Vec<i64> {
        let default = self.default_brand.as_deref();
        self.brands
            .iter()
            .filter(|b| Some(b.name.as_str()) != default)
            .filter(|b| match mode {
                Mode::Weekday => true,
                Mode::RestDay => !b.is_daytime,
            })
            .map(|b| b.marketplace_id)
            .collect()
    }
}

/// Source mapping between an account and one of its listed products.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Nomenclature {
    pub id: i64,
    pub account_id: i64,
    pub article: String,
    /// Kept as text: upstream imports occasionally carry garbage here.
    pub root_id: String,
    pub original_brand: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Mode {
    Weekday,
    RestDay,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Weekday => "weekday",
            Mode::RestDay => "rest-day",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FlowKind {
    Outbound,
    Inbound,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Outbound => "outbound",
            FlowKind::Inbound => "inbound",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub user_id: i64,
    /// 0 = Monday .. 6 = Sunday
    pub weekday: u8,
    pub time: NaiveTime,
    pub action: FlowKind,
}

/// One item of a paged catalog listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub root: i64,
    pub nm_id: Option<i64>,
    pub brand: Option<String>,
    pub brand_id: Option<i64>,
    pub supplier_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Changed,
    SubmittedOk,
    SubmittedFailed,
}

/// A content card flowing through one reconciliation pass. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub nm_id: i64,
    pub root: i64,
    pub brand: String,
    /// Destination fields passed through untouched (subject to the update allow-list).
    pub payload: Map<String, Value>,
    pub credential: String,
    pub account_id: i64,
    pub original_brand: Option<String>,
    pub outcome: Outcome,
}

impl Card {
    /// Project the card onto the fields the update endpoint accepts.
    /// Annotations added during fetch never reach the wire.
    pub fn wire_payload(&self, allowed: &[String]) -> Value {
        let mut out = Map::new();
        for field in allowed {
            match field.as_str() {
                "nmID" => {
                    out.insert(field.clone(), Value::from(self.nm_id));
                }
                "imtID" => {
                    out.insert(field.clone(), Value::from(self.root));
                }
                "brand" => {
                    out.insert(field.clone(), Value::from(self.brand.clone()));
                }
                other => {
                    if let Some(v) = self.payload.get(other) {
                        out.insert(field.clone(), v.clone());
                    }
                }
            }
        }
        Value::Object(out)
    }
}

/// Shorten a credential for logs and error strings.
pub fn mask_credential(credential: &str) -> String {
    let prefix: String = credential.chars().take(6).collect();
    format!("{}…", prefix)
}
