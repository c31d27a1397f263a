#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use brandsync::db::{run_migrations, Pool, SqliteStore, Store};
use brandsync::marketplace::executor::RequestError;
use brandsync::marketplace::model::RawCard;
use brandsync::marketplace::{CatalogSource, Marketplace};
use brandsync::model::{Account, BrandPolicy, CatalogEntry, Nomenclature, ScheduleEntry};
use brandsync::notify::Notifier;
use brandsync::sync::SyncSettings;

pub async fn setup_store() -> (SqliteStore, Pool) {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    (SqliteStore::new(pool.clone()), pool)
}

pub async fn insert_company(pool: &Pool, name: &str, key: &str, supplier: i64, order: i64) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO companies (name, api_key, expires_at, company_id, cabinet_order) \
         VALUES (?, ?, '2030-01-01', ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(key)
    .bind(supplier)
    .bind(order)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn insert_brand(pool: &Pool, company: i64, name: &str, daytime: bool, wb_id: i64) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO brands (name, is_daytime, company_id, wb_id) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(daytime)
    .bind(company)
    .bind(wb_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn set_default_brand(pool: &Pool, company: i64, brand: i64) {
    sqlx::query("UPDATE companies SET default_brand_id = ? WHERE id = ?")
        .bind(brand)
        .bind(company)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn insert_mapping(pool: &Pool, company: i64, root_id: &str, original: Option<&str>) {
    sqlx::query(
        "INSERT INTO nomenclature (wb_article, root_id, original_brand, company_id) VALUES (?, ?, ?, ?)",
    )
    .bind(format!("art-{}", root_id))
    .bind(root_id)
    .bind(original)
    .bind(company)
    .execute(pool)
    .await
    .unwrap();
}

/// Account "A" (key token-a, catalog 77): default Acme, day DayCo, night NightCo.
pub async fn seed_account_a(pool: &Pool) -> i64 {
    let a = insert_company(pool, "A", "token-a", 77, 2).await;
    let acme = insert_brand(pool, a, "Acme", true, 10).await;
    insert_brand(pool, a, "DayCo", true, 11).await;
    insert_brand(pool, a, "NightCo", false, 12).await;
    set_default_brand(pool, a, acme).await;
    a
}

pub fn quiet_settings() -> SyncSettings {
    SyncSettings {
        page_pause: Duration::ZERO,
        card_pause: Duration::ZERO,
        batch_pause: Duration::ZERO,
        repair_cooldown: Duration::ZERO,
        ..SyncSettings::default()
    }
}

#[derive(Debug, Clone)]
pub struct UpdateCall {
    pub credential: String,
    pub cards: Vec<Value>,
}

#[derive(Default)]
struct World {
    /// supplier id -> listed entries
    catalog: HashMap<i64, Vec<CatalogEntry>>,
    cards: HashMap<i64, Vec<RawCard>>,
    brand_ids: HashMap<String, i64>,
    /// Roots whose updates are accepted but never take effect.
    sticky: HashSet<i64>,
    unauthorized: HashSet<String>,
    catalog_calls: Vec<(i64, u32, Vec<i64>)>,
    list_calls: Vec<(String, i64)>,
    update_calls: Vec<UpdateCall>,
}

/// Marketplace fake whose catalog and cards react to accepted updates.
#[derive(Clone, Default)]
pub struct RecordingMarketplace {
    world: Arc<Mutex<World>>,
}

const PAGE_SIZE: usize = 2;

impl RecordingMarketplace {
    pub async fn known_brand(&self, name: &str, id: i64) {
        self.world.lock().await.brand_ids.insert(name.into(), id);
    }

    /// List a product and its single card.
    pub async fn list_product(&self, supplier: i64, root: i64, nm_id: i64, brand: &str) {
        let mut w = self.world.lock().await;
        let brand_id = w.brand_ids.get(brand).copied();
        w.catalog.entry(supplier).or_default().push(CatalogEntry {
            root,
            nm_id: Some(nm_id),
            brand: Some(brand.into()),
            brand_id,
            supplier_id: supplier,
        });
        let mut rest = Map::new();
        rest.insert("vendorCode".into(), json!(format!("V-{}", nm_id)));
        rest.insert("subjectName".into(), json!("Shirts"));
        w.cards.entry(root).or_default().push(RawCard {
            nm_id,
            imt_id: root,
            brand: brand.into(),
            rest,
        });
    }

    /// A card the content API knows about but the catalog does not show.
    pub async fn unlisted_card(&self, root: i64, nm_id: i64, brand: &str) {
        let mut w = self.world.lock().await;
        w.cards.entry(root).or_default().push(RawCard {
            nm_id,
            imt_id: root,
            brand: brand.into(),
            rest: Map::new(),
        });
    }

    pub async fn make_sticky(&self, root: i64) {
        self.world.lock().await.sticky.insert(root);
    }

    pub async fn reject_credential(&self, credential: &str) {
        self.world.lock().await.unauthorized.insert(credential.into());
    }

    pub async fn catalog_calls(&self) -> Vec<(i64, u32, Vec<i64>)> {
        self.world.lock().await.catalog_calls.clone()
    }

    pub async fn list_calls(&self) -> Vec<(String, i64)> {
        self.world.lock().await.list_calls.clone()
    }

    pub async fn update_calls(&self) -> Vec<UpdateCall> {
        self.world.lock().await.update_calls.clone()
    }

    pub async fn card_brand(&self, root: i64, nm_id: i64) -> Option<String> {
        let w = self.world.lock().await;
        w.cards
            .get(&root)?
            .iter()
            .find(|c| c.nm_id == nm_id)
            .map(|c| c.brand.clone())
    }
}

#[async_trait]
impl Marketplace for RecordingMarketplace {
    async fn catalog_page(
        &self,
        source: CatalogSource,
        supplier_id: i64,
        page: u32,
        brand_ids: &[i64],
    ) -> Result<Vec<CatalogEntry>, RequestError> {
        let mut w = self.world.lock().await;
        w.catalog_calls.push((supplier_id, page, brand_ids.to_vec()));
        if source == CatalogSource::Mirror {
            return Ok(Vec::new());
        }
        let matching: Vec<CatalogEntry> = w
            .catalog
            .get(&supplier_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| {
                        brand_ids.is_empty() || e.brand_id.map_or(false, |id| brand_ids.contains(&id))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let start = (page as usize - 1) * PAGE_SIZE;
        Ok(matching.into_iter().skip(start).take(PAGE_SIZE).collect())
    }

    async fn list_cards(
        &self,
        credential: &str,
        root: i64,
        _limit: u32,
    ) -> Result<Vec<RawCard>, RequestError> {
        let mut w = self.world.lock().await;
        w.list_calls.push((credential.into(), root));
        if w.unauthorized.contains(credential) {
            return Err(RequestError::Unauthorized);
        }
        Ok(w.cards.get(&root).cloned().unwrap_or_default())
    }

    async fn update_cards(&self, credential: &str, cards: &[Value]) -> Result<(), RequestError> {
        let mut w = self.world.lock().await;
        w.update_calls.push(UpdateCall {
            credential: credential.into(),
            cards: cards.to_vec(),
        });
        if w.unauthorized.contains(credential) {
            return Err(RequestError::Unauthorized);
        }
        for payload in cards {
            let (Some(nm_id), Some(brand)) = (payload["nmID"].as_i64(), payload["brand"].as_str())
            else {
                continue;
            };
            let brand = brand.to_string();
            let brand_id = w.brand_ids.get(&brand).copied();
            let World { cards: all_cards, catalog, sticky, .. } = &mut *w;
            for (root, list) in all_cards.iter_mut() {
                if sticky.contains(root) {
                    continue;
                }
                for card in list.iter_mut().filter(|c| c.nm_id == nm_id) {
                    card.brand = brand.clone();
                }
            }
            for entry in catalog.values_mut().flatten() {
                if entry.nm_id == Some(nm_id) && !sticky.contains(&entry.root) {
                    entry.brand = Some(brand.clone());
                    entry.brand_id = brand_id;
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub deliveries: Arc<Mutex<Vec<Vec<String>>>>,
}

impl RecordingNotifier {
    pub async fn deliveries(&self) -> Vec<Vec<String>> {
        self.deliveries.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, lines: &[String]) -> Result<()> {
        self.deliveries.lock().await.push(lines.to_vec());
        Ok(())
    }
}

/// Store without a database, for tests that run on a paused clock.
#[derive(Default)]
pub struct MemoryStore {
    pub accounts: Vec<(Account, Vec<Nomenclature>)>,
    pub holidays: Vec<NaiveDate>,
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.iter().map(|(a, _)| a.clone()).collect())
    }

    async fn list_accounts_with_mappings(&self) -> Result<Vec<(Account, Vec<Nomenclature>)>> {
        Ok(self.accounts.clone())
    }

    async fn account_by_credential(&self, credential: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .iter()
            .find(|(a, _)| a.credential == credential)
            .map(|(a, _)| a.clone()))
    }

    async fn night_brands(&self) -> Result<Vec<BrandPolicy>> {
        Ok(self
            .accounts
            .iter()
            .flat_map(|(a, _)| a.brands.iter().filter(|b| !b.is_daytime).cloned())
            .collect())
    }

    async fn is_rest_day(&self, date: NaiveDate) -> Result<bool> {
        Ok(matches!(date.weekday(), Weekday::Sat | Weekday::Sun) || self.holidays.contains(&date))
    }

    async fn save_schedule(&self, _entry: &ScheduleEntry) -> Result<i64> {
        Ok(1)
    }
}

fn policy(name: &str, id: i64, is_daytime: bool) -> BrandPolicy {
    BrandPolicy {
        id,
        name: name.into(),
        marketplace_id: id,
        is_daytime,
        account_id: 1,
    }
}

/// Same shape as [`seed_account_a`], without SQLite.
pub fn memory_account_a(roots: &[&str]) -> (Account, Vec<Nomenclature>) {
    let account = Account {
        id: 1,
        name: "A".into(),
        credential: "token-a".into(),
        supplier_id: Some(77),
        cabinet_order: Some(2),
        default_brand: Some("Acme".into()),
        brands: vec![
            policy("Acme", 10, true),
            policy("DayCo", 11, true),
            policy("NightCo", 12, false),
        ],
    };
    let mappings = roots
        .iter()
        .enumerate()
        .map(|(i, root)| Nomenclature {
            id: i as i64 + 1,
            account_id: 1,
            article: format!("art-{}", root),
            root_id: root.to_string(),
            original_brand: None,
        })
        .collect();
    (account, mappings)
}
