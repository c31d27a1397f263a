//! Recording marketplace fake shared by the engine's unit tests.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::Instant;

use crate::marketplace::executor::RequestError;
use crate::marketplace::model::RawCard;
use crate::marketplace::{CatalogSource, Marketplace};
use crate::model::{Account, BrandPolicy, Card, CatalogEntry, Outcome};

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogCall {
    pub source: CatalogSource,
    pub supplier_id: i64,
    pub page: u32,
    pub brand_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct UpdateCall {
    pub credential: String,
    pub cards: Vec<Value>,
    pub at: Instant,
}

#[derive(Default)]
struct State {
    catalog: HashMap<(bool, u32), Vec<CatalogEntry>>,
    catalog_failures: HashMap<u32, RequestError>,
    cards: HashMap<i64, Vec<RawCard>>,
    card_failures: HashMap<i64, RequestError>,
    update_failures: HashMap<String, RequestError>,
    catalog_calls: Vec<CatalogCall>,
    list_calls: Vec<(String, i64)>,
    update_calls: Vec<UpdateCall>,
}

#[derive(Default)]
pub struct FakeMarketplace {
    state: Mutex<State>,
}

fn is_mirror(source: CatalogSource) -> bool {
    source == CatalogSource::Mirror
}

impl FakeMarketplace {
    pub fn set_catalog(&self, source: CatalogSource, pages: Vec<Vec<CatalogEntry>>) {
        let mut st = self.state.lock().unwrap();
        for (i, page) in pages.into_iter().enumerate() {
            st.catalog.insert((is_mirror(source), i as u32 + 1), page);
        }
    }

    pub fn fail_catalog_page(&self, page: u32, err: RequestError) {
        self.state.lock().unwrap().catalog_failures.insert(page, err);
    }

    pub fn set_cards(&self, root: i64, cards: Vec<RawCard>) {
        self.state.lock().unwrap().cards.insert(root, cards);
    }

    pub fn fail_root(&self, root: i64, err: RequestError) {
        self.state.lock().unwrap().card_failures.insert(root, err);
    }

    pub fn fail_updates_for(&self, credential: &str, err: RequestError) {
        self.state
            .lock()
            .unwrap()
            .update_failures
            .insert(credential.to_string(), err);
    }

    pub fn catalog_calls(&self) -> Vec<CatalogCall> {
        self.state.lock().unwrap().catalog_calls.clone()
    }

    pub fn list_calls(&self) -> Vec<(String, i64)> {
        self.state.lock().unwrap().list_calls.clone()
    }

    pub fn update_calls(&self) -> Vec<UpdateCall> {
        self.state.lock().unwrap().update_calls.clone()
    }
}

#[async_trait]
impl Marketplace for FakeMarketplace {
    async fn catalog_page(
        &self,
        source: CatalogSource,
        supplier_id: i64,
        page: u32,
        brand_ids: &[i64],
    ) -> Result<Vec<CatalogEntry>, RequestError> {
        let mut st = self.state.lock().unwrap();
        st.catalog_calls.push(CatalogCall {
            source,
            supplier_id,
            page,
            brand_ids: brand_ids.to_vec(),
        });
        if let Some(err) = st.catalog_failures.get(&page) {
            return Err(err.clone());
        }
        Ok(st
            .catalog
            .get(&(is_mirror(source), page))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_cards(
        &self,
        credential: &str,
        root: i64,
        _limit: u32,
    ) -> Result<Vec<RawCard>, RequestError> {
        let mut st = self.state.lock().unwrap();
        st.list_calls.push((credential.to_string(), root));
        if let Some(err) = st.card_failures.get(&root) {
            return Err(err.clone());
        }
        Ok(st.cards.get(&root).cloned().unwrap_or_default())
    }

    async fn update_cards(&self, credential: &str, cards: &[Value]) -> Result<(), RequestError> {
        let mut st = self.state.lock().unwrap();
        st.update_calls.push(UpdateCall {
            credential: credential.to_string(),
            cards: cards.to_vec(),
            at: Instant::now(),
        });
        match st.update_failures.get(credential) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

pub fn brand(name: &str, marketplace_id: i64, is_daytime: bool) -> BrandPolicy {
    BrandPolicy {
        id: marketplace_id,
        name: name.into(),
        marketplace_id,
        is_daytime,
        account_id: 1,
    }
}

/// Account "A": default Acme, day brand DayCo, night brand NightCo.
pub fn account() -> Account {
    Account {
        id: 1,
        name: "A".into(),
        credential: "token-a".into(),
        supplier_id: Some(77),
        cabinet_order: Some(1),
        default_brand: Some("Acme".into()),
        brands: vec![
            brand("Acme", 10, true),
            brand("DayCo", 11, true),
            brand("NightCo", 12, false),
        ],
    }
}

pub fn raw_card(nm_id: i64, root: i64, brand: &str) -> RawCard {
    let mut rest = Map::new();
    rest.insert("vendorCode".into(), json!(format!("V-{}", nm_id)));
    RawCard {
        nm_id,
        imt_id: root,
        brand: brand.into(),
        rest,
    }
}

pub fn card(nm_id: i64, brand: &str, credential: &str) -> Card {
    Card {
        nm_id,
        root: nm_id * 10,
        brand: brand.into(),
        payload: Map::new(),
        credential: credential.into(),
        account_id: 1,
        original_brand: None,
        outcome: Outcome::Unchanged,
    }
}
