//! Serde-deserializable types matching the catalog API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::{Deserialize, Serialize};

// ============================================================================
// Product listing
// ============================================================================

/// One page of `GET products` results.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiProductPage {
  #[serde(default, rename = "products")]
  pub items: Vec<ApiProductWithPrices>,
  #[serde(default)]
  pub total: u64,
}

/// A product together with every shop listing the server knows about.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ApiProductWithPrices {
  pub product: ApiProduct,
  #[serde(default)]
  pub prices: Vec<ApiPrice>,
  pub min_price: Option<f64>,
  pub max_price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ApiProduct {
  #[serde(rename = "id_product")]
  pub id: i64,
  pub title: Option<String>,
  pub brand: Option<String>,
  pub model: Option<String>,
  pub description: Option<String>,
  pub image: Option<String>,
  pub url: Option<String>,
}

// ============================================================================
// Shop prices
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ApiPrice {
  pub price: f64,
  pub shop_name: String,
  #[serde(default)]
  pub shop_id: i64,
  pub url: Option<String>,
  #[serde(default)]
  pub scraped_at: String,
}
