use serde::{Deserialize, Serialize};

/// Display-ready product for list views.
///
/// Optional fields stay `None` when the server did not supply them; the
/// human-readable fallbacks live in `crate::display`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
  pub id: i64,
  pub title: String,
  pub brand: Option<String>,
  pub model: Option<String>,
  pub description: Option<String>,
  pub image: Option<String>,
  pub price: Option<f64>,
  pub shop_count: usize,
  pub cheapest_shop: Option<String>,
  pub url: Option<String>,
}

/// One shop's price for a product, ordered for comparison views
#[derive(Debug, Clone, PartialEq)]
pub struct ShopOffer {
  pub shop_name: String,
  pub shop_id: i64,
  pub price: f64,
  pub url: Option<String>,
  pub scraped_at: String,
  pub is_cheapest: bool,
  /// Difference to the most expensive offer
  pub savings: f64,
}

/// Full product details with every shop offer
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDetail {
  pub product: Product,
  pub offers: Vec<ShopOffer>,
  pub min_price: Option<f64>,
  pub max_price: Option<f64>,
}

/// Converted products of one fetched page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductPage {
  pub products: Vec<Product>,
  /// Raw records the server returned, before invalid ones were dropped
  pub fetched: usize,
}

impl ProductPage {
  /// A page shorter than requested is the last one.
  pub fn is_last(&self, page_size: usize) -> bool {
    self.fetched < page_size
  }
}
