//! Product cache: paged lists and single-product details in two namespaces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::api_types::ApiProductWithPrices;
use crate::catalog::types::ProductPage;
use crate::config::CacheConfig;

use super::sqlite::SqliteCache;
use super::storage::{CacheEntry, TtlStore};
use super::traits::{CacheResult, CacheStats, Clock, SystemClock};

/// Key of one cached product page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListKey {
  /// Search text; empty for the popular list
  pub query: String,
  pub offset: usize,
  pub limit: usize,
}

impl ListKey {
  pub fn new(query: &str, offset: usize, limit: usize) -> Self {
    Self {
      query: query.to_string(),
      offset,
      limit,
    }
  }
}

impl fmt::Display for ListKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "products_{}_{}_{}", self.query, self.offset, self.limit)
  }
}

const LISTS: &str = "product_lists";
const DETAILS: &str = "product_details";

/// Cache for product lists and product details.
///
/// Each namespace applies TTL and size eviction on its own. Cloning shares
/// the underlying storage.
#[derive(Clone)]
pub struct ProductCache {
  lists: Arc<TtlStore<ListKey, ProductPage>>,
  details: Arc<TtlStore<i64, ApiProductWithPrices>>,
}

impl ProductCache {
  /// Create an in-memory cache using the wall clock.
  pub fn new(config: &CacheConfig) -> Self {
    Self::build(config, Arc::new(SystemClock), None)
  }

  #[cfg(test)]
  pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
    Self::build(config, clock, None)
  }

  /// Create a cache mirrored to `db`, starting from what earlier runs stored.
  pub fn persistent(config: &CacheConfig, db: &SqliteCache) -> Self {
    Self::build(config, Arc::new(SystemClock), Some(db))
  }

  fn build(config: &CacheConfig, clock: Arc<dyn Clock>, db: Option<&SqliteCache>) -> Self {
    let lists = match db {
      Some(db) => TtlStore::with_persistence(
        LISTS,
        config.list_ttl(),
        config.max_entries,
        Arc::clone(&clock),
        Arc::new(db.namespace::<ListKey, ProductPage>(LISTS)),
      ),
      None => TtlStore::new(LISTS, config.list_ttl(), config.max_entries, Arc::clone(&clock)),
    };
    let details = match db {
      Some(db) => TtlStore::with_persistence(
        DETAILS,
        config.detail_ttl(),
        config.max_entries,
        clock,
        Arc::new(db.namespace::<i64, ApiProductWithPrices>(DETAILS)),
      ),
      None => TtlStore::new(DETAILS, config.detail_ttl(), config.max_entries, clock),
    };

    Self {
      lists: Arc::new(lists),
      details: Arc::new(details),
    }
  }

  pub fn get_list(&self, key: &ListKey) -> Option<CacheEntry<ProductPage>> {
    let entry = self.lists.get(key);
    debug!(%key, hit = entry.is_some(), "List cache lookup");
    entry
  }

  pub fn put_list(&self, key: ListKey, page: ProductPage) {
    debug!(%key, count = page.products.len(), "Caching product list");
    self.lists.put(key, page);
  }

  pub fn get_detail(&self, id: i64) -> Option<CacheEntry<ApiProductWithPrices>> {
    let entry = self.details.get(&id);
    debug!(id, hit = entry.is_some(), "Detail cache lookup");
    entry
  }

  pub fn put_detail(&self, id: i64, detail: ApiProductWithPrices) {
    debug!(id, "Caching product detail");
    self.details.put(id, detail);
  }

  /// Drop every cached page of a search.
  pub fn invalidate_query(&self, query: &str) -> usize {
    let removed = self.lists.remove_where(|key| key.query == query);
    debug!(query, removed, "Invalidated cached pages");
    removed
  }

  pub fn invalidate_detail(&self, id: i64) -> bool {
    self.details.remove(&id)
  }

  pub fn clear(&self) {
    self.lists.clear();
    self.details.clear();
    debug!("Product cache cleared");
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      lists: self.lists.len(),
      details: self.details.len(),
    }
  }

  /// Fetch a product page with cache-first strategy.
  ///
  /// 1. Check cache - if live, return immediately
  /// 2. Otherwise fetch from network
  /// 3. Store the fetched page
  pub async fn fetch_list<E, F, Fut>(
    &self,
    key: ListKey,
    fetcher: F,
  ) -> Result<CacheResult<ProductPage>, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ProductPage, E>>,
  {
    if let Some(cached) = self.get_list(&key) {
      return Ok(CacheResult::from_cache(cached.value, cached.created_at));
    }

    let data = fetcher().await?;
    self.put_list(key, data.clone());
    Ok(CacheResult::from_network(data))
  }

  /// Fetch a single product detail with caching.
  pub async fn fetch_detail<E, F, Fut>(
    &self,
    id: i64,
    fetcher: F,
  ) -> Result<CacheResult<ApiProductWithPrices>, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ApiProductWithPrices, E>>,
  {
    if let Some(cached) = self.get_detail(id) {
      return Ok(CacheResult::from_cache(cached.value, cached.created_at));
    }

    let data = fetcher().await?;
    self.put_detail(id, data.clone());
    Ok(CacheResult::from_network(data))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::{CacheSource, ManualClock};
  use crate::catalog::api_types::ApiProduct;
  use crate::catalog::types::Product;
  use chrono::Duration;

  fn product(id: i64) -> Product {
    Product {
      id,
      title: format!("Product {}", id),
      brand: None,
      model: None,
      description: None,
      image: None,
      price: Some(10.0),
      shop_count: 1,
      cheapest_shop: None,
      url: None,
    }
  }

  fn page(ids: &[i64]) -> ProductPage {
    ProductPage {
      products: ids.iter().map(|&id| product(id)).collect(),
      fetched: ids.len(),
    }
  }

  fn detail(id: i64) -> ApiProductWithPrices {
    ApiProductWithPrices {
      product: ApiProduct {
        id,
        ..Default::default()
      },
      ..Default::default()
    }
  }

  fn cache(clock: Arc<ManualClock>) -> ProductCache {
    ProductCache::with_clock(&CacheConfig::default(), clock)
  }

  #[test]
  fn test_list_key_format() {
    assert_eq!(ListKey::new("phone", 20, 20).to_string(), "products_phone_20_20");
  }

  #[test]
  fn test_namespaces_are_independent() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache(clock);

    cache.put_list(ListKey::new("phone", 0, 20), page(&[1]));
    cache.put_detail(1, detail(1));
    assert_eq!(cache.stats(), CacheStats { lists: 1, details: 1 });

    assert!(cache.invalidate_detail(1));
    assert_eq!(cache.stats(), CacheStats { lists: 1, details: 0 });
    assert!(cache.get_list(&ListKey::new("phone", 0, 20)).is_some());
  }

  #[test]
  fn test_invalidate_query_only_touches_that_query() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache(clock);

    cache.put_list(ListKey::new("phone", 0, 20), page(&[1]));
    cache.put_list(ListKey::new("phone", 20, 20), page(&[2]));
    cache.put_list(ListKey::new("phone case", 0, 20), page(&[3]));

    assert_eq!(cache.invalidate_query("phone"), 2);
    assert!(cache.get_list(&ListKey::new("phone case", 0, 20)).is_some());
  }

  #[test]
  fn test_clear_empties_both_namespaces() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache(clock);

    cache.put_list(ListKey::new("", 0, 10), page(&[1]));
    cache.put_detail(1, detail(1));
    cache.clear();
    assert_eq!(cache.stats(), CacheStats::default());
  }

  #[test]
  fn test_stats_exclude_expired() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache(clock.clone());

    cache.put_list(ListKey::new("phone", 0, 20), page(&[1]));
    clock.advance(Duration::minutes(6));
    assert_eq!(cache.stats().lists, 0);
  }

  #[test]
  fn test_persistent_cache_survives_reopen() {
    let clock = Arc::new(ManualClock::new());
    let db = SqliteCache::open_in_memory().unwrap();
    let config = CacheConfig::default();

    let first = ProductCache::build(&config, clock.clone(), Some(&db));
    first.put_list(ListKey::new("phone", 0, 20), page(&[1, 2]));
    first.put_detail(7, detail(7));
    drop(first);

    let second = ProductCache::build(&config, clock.clone(), Some(&db));
    assert_eq!(second.stats(), CacheStats { lists: 1, details: 1 });
    let cached = second.get_list(&ListKey::new("phone", 0, 20)).unwrap();
    assert_eq!(cached.value, page(&[1, 2]));
    assert_eq!(second.get_detail(7).unwrap().value.product.id, 7);

    second.invalidate_query("phone");
    clock.advance(Duration::minutes(6));
    let third = ProductCache::build(&config, clock, Some(&db));
    assert_eq!(third.stats(), CacheStats::default());
  }

  #[test]
  fn test_huge_ttl_does_not_overflow() {
    let clock = Arc::new(ManualClock::new());
    let config = CacheConfig {
      list_ttl_secs: u64::MAX,
      ..Default::default()
    };
    let cache = ProductCache::with_clock(&config, clock.clone());

    cache.put_list(ListKey::new("phone", 0, 20), page(&[1]));
    clock.advance(Duration::days(365));
    assert_eq!(cache.stats().lists, 1);
  }

  #[tokio::test]
  async fn test_fetch_detail_is_cache_first() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache(clock.clone());

    let first = cache
      .fetch_detail(5, || async { Ok::<_, String>(detail(5)) })
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Network);

    let second = cache
      .fetch_detail(5, || async { Err::<ApiProductWithPrices, _>("unreachable".to_string()) })
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data.product.id, 5);

    clock.advance(Duration::minutes(10));
    let third = cache
      .fetch_detail(5, || async { Err::<ApiProductWithPrices, _>("offline".to_string()) })
      .await;
    assert_eq!(third.unwrap_err(), "offline");
  }

  #[tokio::test]
  async fn test_fetch_list_failure_leaves_cache_untouched() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache(clock);

    let result = cache
      .fetch_list(ListKey::new("tv", 0, 20), || async {
        Err::<ProductPage, _>("boom".to_string())
      })
      .await;
    assert!(result.is_err());
    assert_eq!(cache.stats().lists, 0);
  }
}
