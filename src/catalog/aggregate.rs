//! Conversion of raw product-with-prices records into display products.
//!
//! The cheapest listing decides the shown price and shop. `PricePolicy`
//! decides which listing wins a price tie and where the product link comes
//! from.

use rayon::prelude::*;
use serde::Deserialize;
use tracing::warn;

use crate::display::{UNSPECIFIED, UNSPECIFIED_MODEL};

use super::api_types::{ApiPrice, ApiProductWithPrices};
use super::error::ConversionError;
use super::types::Product;

/// Which listing wins when several share the minimum price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
  /// Earliest listing in server order
  #[default]
  First,
  /// Latest listing in server order
  Last,
}

/// A place to take the product link from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlSource {
  /// The product's own url
  Product,
  /// The cheapest listing's url
  Cheapest,
  /// The first listing that has a url
  FirstAvailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricePolicy {
  pub tie_break: TieBreak,
  /// Tried in order; the first non-empty url wins
  pub url_order: Vec<UrlSource>,
}

impl Default for PricePolicy {
  fn default() -> Self {
    Self {
      tie_break: TieBreak::First,
      url_order: vec![
        UrlSource::Product,
        UrlSource::Cheapest,
        UrlSource::FirstAvailable,
      ],
    }
  }
}

/// Converts raw catalog records into `Product`s.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
  policy: PricePolicy,
}

impl Aggregator {
  pub fn new(policy: PricePolicy) -> Self {
    Self { policy }
  }

  /// Pick the cheapest listing according to the tie-break policy.
  pub fn cheapest<'a>(&self, prices: &'a [ApiPrice]) -> Option<&'a ApiPrice> {
    let mut best: Option<&ApiPrice> = None;
    for candidate in prices {
      best = match best {
        None => Some(candidate),
        Some(current) if candidate.price < current.price => Some(candidate),
        Some(current) if candidate.price == current.price && self.policy.tie_break == TieBreak::Last => {
          Some(candidate)
        }
        keep => keep,
      };
    }
    best
  }

  /// Convert one raw record.
  pub fn convert(&self, raw: &ApiProductWithPrices) -> Result<Product, ConversionError> {
    let id = raw.product.id;
    if id <= 0 {
      return Err(ConversionError::InvalidId(id));
    }
    if raw.prices.iter().any(|p| !p.price.is_finite()) {
      return Err(ConversionError::InvalidPrice { id });
    }

    let product = &raw.product;
    let cheapest = self.cheapest(&raw.prices);

    let price = cheapest
      .map(|p| p.price)
      .or(raw.min_price.filter(|p| p.is_finite()));

    let brand = non_blank(product.brand.as_deref());
    let model = non_blank(product.model.as_deref());
    let title = match non_blank(product.title.as_deref()) {
      Some(title) => title,
      None => format!(
        "{} {}",
        brand.as_deref().unwrap_or(UNSPECIFIED),
        model.as_deref().unwrap_or(UNSPECIFIED_MODEL)
      ),
    };

    Ok(Product {
      id,
      title,
      brand,
      model,
      description: non_blank(product.description.as_deref()),
      image: non_blank(product.image.as_deref()),
      price,
      shop_count: raw.prices.len(),
      cheapest_shop: cheapest.and_then(|p| non_blank(Some(p.shop_name.as_str()))),
      url: self.resolve_url(raw, cheapest),
    })
  }

  /// Convert a batch in parallel, dropping records that fail.
  ///
  /// Output order follows input order.
  pub fn convert_all(&self, raw: &[ApiProductWithPrices]) -> Vec<Product> {
    raw
      .par_iter()
      .map(|item| self.convert(item))
      .collect::<Vec<_>>()
      .into_iter()
      .filter_map(|result| match result {
        Ok(product) => Some(product),
        Err(e) => {
          warn!("Dropping product from batch: {}", e);
          None
        }
      })
      .collect()
  }

  fn resolve_url(&self, raw: &ApiProductWithPrices, cheapest: Option<&ApiPrice>) -> Option<String> {
    self.policy.url_order.iter().find_map(|source| match source {
      UrlSource::Product => non_blank(raw.product.url.as_deref()),
      UrlSource::Cheapest => cheapest.and_then(|p| non_blank(p.url.as_deref())),
      UrlSource::FirstAvailable => raw
        .prices
        .iter()
        .find_map(|p| non_blank(p.url.as_deref())),
    })
  }
}

fn non_blank(value: Option<&str>) -> Option<String> {
  value
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(String::from)
}
