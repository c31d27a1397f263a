//! Persistence collaborator: accounts, brands, mappings, holidays, schedules.
//!
//! This module is split into two submodules:
//! - `model`: row structs as read from SQLite.
//! - `repo`: SQL-only functions plus [`SqliteStore`], the production [`Store`].
//!
//! The sync engine only depends on the [`Store`] trait. Every method opens its
//! own short-lived connection; nothing here is held across a marketplace call.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::{Account, BrandPolicy, Nomenclature, ScheduleEntry};

pub mod model;
pub mod repo;

pub use repo::{init_pool, run_migrations, Pool, SqliteStore};

#[async_trait]
pub trait Store: Send + Sync {
    /// All accounts, highest cabinet order first.
    async fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Accounts together with their source mappings, same ordering as `list_accounts`.
    async fn list_accounts_with_mappings(&self) -> Result<Vec<(Account, Vec<Nomenclature>)>>;

    async fn account_by_credential(&self, credential: &str) -> Result<Option<Account>>;

    /// Brands that may stay active outside business days, across all accounts.
    async fn night_brands(&self) -> Result<Vec<BrandPolicy>>;

    /// Saturday, Sunday, or a date listed in the holiday table.
    async fn is_rest_day(&self, date: NaiveDate) -> Result<bool>;

    async fn save_schedule(&self, entry: &ScheduleEntry) -> Result<i64>;
}
