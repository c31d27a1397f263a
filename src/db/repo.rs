use super::model::{AccountRow, BrandRow, NomenclatureRow};
use super::Store;
use crate::model::{Account, BrandPolicy, Nomenclature, ScheduleEntry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{instrument, warn};

pub type Pool = SqlitePool;

const STORE_ATTEMPTS: u32 = 3;

const ACCOUNT_SELECT: &str = "SELECT c.id, c.name, c.api_key, c.company_id, c.cabinet_order, \
     b.name AS default_brand \
     FROM companies c LEFT JOIN brands b ON b.id = c.default_brand_id";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and make sure the file gets created. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn is_stale_connection(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}

/// Run a read, retrying when the connection turned out to be stale.
async fn with_reconnect<T, F, Fut>(what: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_stale_connection(&err) && attempt < STORE_ATTEMPTS => {
                warn!(?err, attempt, what, "stale database connection; retrying");
                tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
            }
            Err(err) => return Err(anyhow::Error::new(err).context(what)),
        }
    }
}

pub async fn fetch_account_rows(pool: &Pool) -> Result<Vec<AccountRow>, sqlx::Error> {
    let sql = format!("{} ORDER BY c.cabinet_order DESC, c.id", ACCOUNT_SELECT);
    sqlx::query_as::<_, AccountRow>(&sql).fetch_all(pool).await
}

pub async fn fetch_account_row_by_key(
    pool: &Pool,
    api_key: &str,
) -> Result<Option<AccountRow>, sqlx::Error> {
    let sql = format!("{} WHERE c.api_key = ?", ACCOUNT_SELECT);
    sqlx::query_as::<_, AccountRow>(&sql)
        .bind(api_key)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_brand_rows(pool: &Pool) -> Result<Vec<BrandRow>, sqlx::Error> {
    sqlx::query_as::<_, BrandRow>(
        "SELECT id, name, is_daytime, company_id, wb_id FROM brands ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

pub async fn fetch_brand_rows_for(pool: &Pool, company: i64) -> Result<Vec<BrandRow>, sqlx::Error> {
    sqlx::query_as::<_, BrandRow>(
        "SELECT id, name, is_daytime, company_id, wb_id FROM brands WHERE company_id = ? ORDER BY id",
    )
    .bind(company)
    .fetch_all(pool)
    .await
}

pub async fn fetch_night_brand_rows(pool: &Pool) -> Result<Vec<BrandRow>, sqlx::Error> {
    sqlx::query_as::<_, BrandRow>(
        "SELECT id, name, is_daytime, company_id, wb_id FROM brands WHERE is_daytime = 0 ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

pub async fn fetch_nomenclature_rows(pool: &Pool) -> Result<Vec<NomenclatureRow>, sqlx::Error> {
    sqlx::query_as::<_, NomenclatureRow>(
        "SELECT id, company_id, wb_article, root_id, original_brand FROM nomenclature ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

pub async fn holiday_exists(pool: &Pool, date: NaiveDate) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM holidays WHERE date = ?")
        .bind(date)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

fn group_brands(rows: Vec<BrandRow>) -> HashMap<i64, Vec<BrandPolicy>> {
    let mut by_company: HashMap<i64, Vec<BrandPolicy>> = HashMap::new();
    for row in rows {
        by_company.entry(row.company_id).or_default().push(row.into());
    }
    by_company
}

/// Production [`Store`] over a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip_all)]
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = with_reconnect("list accounts", || fetch_account_rows(&self.pool)).await?;
        let mut brands =
            group_brands(with_reconnect("list brands", || fetch_brand_rows(&self.pool)).await?);
        Ok(rows
            .into_iter()
            .map(|row| {
                let own = brands.remove(&row.id).unwrap_or_default();
                row.into_account(own)
            })
            .collect())
    }

    #[instrument(skip_all)]
    async fn list_accounts_with_mappings(&self) -> Result<Vec<(Account, Vec<Nomenclature>)>> {
        let accounts = self.list_accounts().await?;
        let rows =
            with_reconnect("list nomenclature", || fetch_nomenclature_rows(&self.pool)).await?;
        let mut by_company: HashMap<i64, Vec<Nomenclature>> = HashMap::new();
        for row in rows {
            by_company.entry(row.company_id).or_default().push(row.into());
        }
        Ok(accounts
            .into_iter()
            .map(|account| {
                let mappings = by_company.remove(&account.id).unwrap_or_default();
                (account, mappings)
            })
            .collect())
    }

    #[instrument(skip_all)]
    async fn account_by_credential(&self, credential: &str) -> Result<Option<Account>> {
        let row = with_reconnect("account by credential", || {
            fetch_account_row_by_key(&self.pool, credential)
        })
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let brands = with_reconnect("account brands", || fetch_brand_rows_for(&self.pool, row.id))
            .await?
            .into_iter()
            .map(BrandPolicy::from)
            .collect();
        Ok(Some(row.into_account(brands)))
    }

    #[instrument(skip_all)]
    async fn night_brands(&self) -> Result<Vec<BrandPolicy>> {
        let rows = with_reconnect("night brands", || fetch_night_brand_rows(&self.pool)).await?;
        Ok(rows.into_iter().map(BrandPolicy::from).collect())
    }

    #[instrument(skip_all, fields(%date))]
    async fn is_rest_day(&self, date: NaiveDate) -> Result<bool> {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return Ok(true);
        }
        with_reconnect("holiday lookup", || holiday_exists(&self.pool, date)).await
    }

    #[instrument(skip_all, fields(user_id = entry.user_id))]
    async fn save_schedule(&self, entry: &ScheduleEntry) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO schedules (user_id, weekday, time, action) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(entry.user_id)
        .bind(i64::from(entry.weekday))
        .bind(entry.time)
        .bind(entry.action.as_str())
        .fetch_one(&self.pool)
        .await
        .context("failed to persist schedule")?;
        Ok(id)
    }
}
