//! Row structs returned by repository queries.
//!
//! Conversion into domain types lives next to each struct; business logic
//! stays in higher layers.

use sqlx::FromRow;

use crate::model::{Account, BrandPolicy, Nomenclature};

#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub name: String,
    pub api_key: String,
    pub company_id: Option<i64>,
    pub cabinet_order: Option<i64>,
    pub default_brand: Option<String>,
}

impl AccountRow {
    pub fn into_account(self, brands: Vec<BrandPolicy>) -> Account {
        Account {
            id: self.id,
            name: self.name,
            credential: self.api_key,
            supplier_id: self.company_id,
            cabinet_order: self.cabinet_order,
            default_brand: self.default_brand,
            brands,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BrandRow {
    pub id: i64,
    pub name: String,
    pub is_daytime: bool,
    pub company_id: i64,
    pub wb_id: i64,
}

impl From<BrandRow> for BrandPolicy {
    fn from(row: BrandRow) -> Self {
        BrandPolicy {
            id: row.id,
            name: row.name,
            marketplace_id: row.wb_id,
            is_daytime: row.is_daytime,
            account_id: row.company_id,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct NomenclatureRow {
    pub id: i64,
    pub company_id: i64,
    pub wb_article: String,
    pub root_id: String,
    pub original_brand: Option<String>,
}

impl From<NomenclatureRow> for Nomenclature {
    fn from(row: NomenclatureRow) -> Self {
        Nomenclature {
            id: row.id,
            account_id: row.company_id,
            article: row.wb_article,
            root_id: row.root_id,
            original_brand: row.original_brand.filter(|b| !b.trim().is_empty()),
        }
    }
}
