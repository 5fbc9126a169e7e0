//! Abstraction over where raw catalog data comes from.

use async_trait::async_trait;

use super::api_types::{ApiProductPage, ApiProductWithPrices};
use super::error::FetchError;

/// Parameters for one page of a product listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
  /// Search text; empty means "no filter"
  pub search: String,
  pub offset: usize,
  pub limit: usize,
}

/// Remote source of raw product data.
///
/// `CatalogClient` talks HTTP; tests substitute in-memory fakes.
#[async_trait]
pub trait ProductSource: Send + Sync {
  /// Fetch one page of products matching a search.
  async fn fetch_page(&self, request: &PageRequest) -> Result<ApiProductPage, FetchError>;

  /// Fetch the currently popular products.
  async fn fetch_popular(&self, limit: usize) -> Result<ApiProductPage, FetchError>;

  /// Fetch one product with all its shop prices.
  async fn fetch_product(&self, id: i64) -> Result<ApiProductWithPrices, FetchError>;
}
