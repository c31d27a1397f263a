use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Deserialize, Debug, Default)]
pub struct CatalogResp {
    #[serde(default)]
    pub products: Option<Vec<CatalogProduct>>,
    #[serde(default)]
    pub data: Option<CatalogData>,
}

#[derive(Deserialize, Debug, Default)]
pub struct CatalogData {
    #[serde(default)]
    pub products: Vec<CatalogProduct>,
}

impl CatalogResp {
    pub fn into_products(self) -> Vec<CatalogProduct> {
        match self.products {
            Some(products) => products,
            None => self.data.map(|d| d.products).unwrap_or_default(),
        }
    }
}

/// One catalog product. `root` is optional here so a single malformed item
/// does not discard the whole page.
#[derive(Deserialize, Debug)]
pub struct CatalogProduct {
    #[serde(default)]
    pub root: Option<i64>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default, rename = "brandId")]
    pub brand_id: Option<i64>,
}

#[derive(Deserialize, Debug, Default)]
pub struct CardsListResp {
    #[serde(default)]
    pub cards: Vec<RawCard>,
}

/// A card as returned by the content list endpoint. Unknown fields are kept.
#[derive(Deserialize, Debug, Clone)]
pub struct RawCard {
    #[serde(rename = "nmID")]
    pub nm_id: i64,
    #[serde(rename = "imtID")]
    pub imt_id: i64,
    #[serde(default)]
    pub brand: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}
