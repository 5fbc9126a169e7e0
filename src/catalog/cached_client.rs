//! Catalog access with transparent caching of product details.

use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheSource, ProductCache};

use super::aggregate::Aggregator;
use super::api_types::ApiProductWithPrices;
use super::error::FetchError;
use super::source::ProductSource;
use super::types::{ProductDetail, ShopOffer};

/// Product source, cache and aggregator bundled together.
///
/// Cloning is cheap and shares the cache.
#[derive(Clone)]
pub struct CachedCatalog {
  source: Arc<dyn ProductSource>,
  cache: ProductCache,
  aggregator: Arc<Aggregator>,
}

impl CachedCatalog {
  pub fn new(source: Arc<dyn ProductSource>, cache: ProductCache, aggregator: Aggregator) -> Self {
    Self {
      source,
      cache,
      aggregator: Arc::new(aggregator),
    }
  }

  pub fn source(&self) -> Arc<dyn ProductSource> {
    Arc::clone(&self.source)
  }

  pub fn cache(&self) -> &ProductCache {
    &self.cache
  }

  pub fn aggregator(&self) -> Arc<Aggregator> {
    Arc::clone(&self.aggregator)
  }

  /// Drop the cached detail so the next lookup goes to the source.
  pub fn forget_detail(&self, id: i64) {
    if self.cache.invalidate_detail(id) {
      debug!(id, "Invalidated cached product detail");
    }
  }

  /// Get a product with every shop offer, cheapest first.
  pub async fn product_detail(&self, id: i64) -> Result<ProductDetail, FetchError> {
    let result = self
      .cache
      .fetch_detail(id, || {
        let source = Arc::clone(&self.source);
        async move { source.fetch_product(id).await }
      })
      .await?;

    match result.source {
      CacheSource::Network => info!(id, "Fetched product detail"),
      CacheSource::Cache => debug!(id, cached_at = ?result.cached_at, "Product detail served from cache"),
    }

    self.build_detail(&result.data)
  }

  fn build_detail(&self, raw: &ApiProductWithPrices) -> Result<ProductDetail, FetchError> {
    let product = self
      .aggregator
      .convert(raw)
      .map_err(|e| FetchError::Decode(e.to_string()))?;

    Ok(ProductDetail {
      product,
      offers: shop_offers(raw),
      min_price: raw.min_price.or_else(|| raw.prices.iter().map(|p| p.price).reduce(f64::min)),
      max_price: raw.max_price.or_else(|| raw.prices.iter().map(|p| p.price).reduce(f64::max)),
    })
  }
}

/// Shop prices sorted ascending; equal prices keep server order.
pub fn shop_offers(raw: &ApiProductWithPrices) -> Vec<ShopOffer> {
  let mut prices: Vec<_> = raw.prices.iter().collect();
  prices.sort_by(|a, b| a.price.total_cmp(&b.price));

  let cheapest = prices.first().map(|p| p.price);
  let most_expensive = prices.last().map(|p| p.price).unwrap_or_default();

  prices
    .into_iter()
    .map(|p| ShopOffer {
      shop_name: p.shop_name.clone(),
      shop_id: p.shop_id,
      price: p.price,
      url: p.url.clone().filter(|u| !u.trim().is_empty()),
      scraped_at: p.scraped_at.clone(),
      is_cheapest: Some(p.price) == cheapest,
      savings: most_expensive - p.price,
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::api_types::{ApiPrice, ApiProduct, ApiProductPage};
  use crate::catalog::source::PageRequest;
  use crate::config::CacheConfig;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct DetailSource {
    calls: AtomicUsize,
    missing: bool,
  }

  #[async_trait]
  impl ProductSource for DetailSource {
    async fn fetch_page(&self, _request: &PageRequest) -> Result<ApiProductPage, FetchError> {
      Ok(ApiProductPage::default())
    }

    async fn fetch_popular(&self, _limit: usize) -> Result<ApiProductPage, FetchError> {
      Ok(ApiProductPage::default())
    }

    async fn fetch_product(&self, id: i64) -> Result<ApiProductWithPrices, FetchError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.missing {
        return Err(FetchError::NotFound);
      }
      Ok(ApiProductWithPrices {
        product: ApiProduct {
          id,
          title: Some("Phone".to_string()),
          ..Default::default()
        },
        prices: vec![price("A", 100.0), price("B", 80.0), price("C", 80.0)],
        min_price: None,
        max_price: None,
      })
    }
  }

  fn price(shop: &str, value: f64) -> ApiPrice {
    ApiPrice {
      price: value,
      shop_name: shop.to_string(),
      ..Default::default()
    }
  }

  fn catalog(missing: bool) -> (CachedCatalog, Arc<DetailSource>) {
    let source = Arc::new(DetailSource {
      calls: AtomicUsize::new(0),
      missing,
    });
    let catalog = CachedCatalog::new(
      source.clone(),
      ProductCache::new(&CacheConfig::default()),
      Aggregator::default(),
    );
    (catalog, source)
  }

  #[tokio::test]
  async fn test_detail_offers_sorted_and_cached() {
    let (catalog, source) = catalog(false);

    let detail = catalog.product_detail(9).await.unwrap();
    let shops: Vec<&str> = detail.offers.iter().map(|o| o.shop_name.as_str()).collect();
    assert_eq!(shops, vec!["B", "C", "A"]);
    assert!(detail.offers[0].is_cheapest);
    assert!(detail.offers[1].is_cheapest);
    assert!(!detail.offers[2].is_cheapest);
    assert_eq!(detail.offers[0].savings, 20.0);
    assert_eq!(detail.min_price, Some(80.0));
    assert_eq!(detail.max_price, Some(100.0));
    assert_eq!(detail.product.cheapest_shop.as_deref(), Some("B"));

    catalog.product_detail(9).await.unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(catalog.cache().stats().details, 1);
  }

  #[tokio::test]
  async fn test_detail_not_found() {
    let (catalog, _) = catalog(true);
    let err = catalog.product_detail(404).await.unwrap_err();
    assert_eq!(err, FetchError::NotFound);
    assert_eq!(err.user_message(), "Product not found.");
    assert_eq!(catalog.cache().stats().details, 0);
  }
}
