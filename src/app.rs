use crate::cache::{ProductCache, SqliteCache};
use crate::catalog::aggregate::Aggregator;
use crate::catalog::cached_client::CachedCatalog;
use crate::catalog::client::CatalogClient;
use crate::catalog::source::ProductSource;
use crate::catalog::types::{Product, ProductDetail};
use crate::config::Config;
use crate::diff::{self, DiffSummary};
use crate::display::{self, Currency};
use crate::pagination::{Paginator, TokioSpawner};
use crate::settings::{MemorySettings, Setting, SettingsProvider, SqliteSettings};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of a search run
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
  pub items: Vec<Product>,
  pub last_page: bool,
  /// Changes against the previously cached results, for refreshes
  pub changes: Option<DiffSummary>,
}

/// Main application state
pub struct App {
  config: Config,
  catalog: CachedCatalog,
  settings: Box<dyn SettingsProvider>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let client = CatalogClient::new(&config)?;

    let settings: Box<dyn SettingsProvider> = match SqliteSettings::open() {
      Ok(settings) => Box::new(settings),
      Err(e) => {
        warn!(error = %e, "Settings database unavailable, using defaults");
        Box::new(MemorySettings::default())
      }
    };

    let cache = match SqliteCache::open() {
      Ok(db) => ProductCache::persistent(&config.cache, &db),
      Err(e) => {
        warn!(error = %e, "Cache database unavailable, caching for this run only");
        ProductCache::new(&config.cache)
      }
    };

    Ok(Self::with_parts(config, Arc::new(client), cache, settings))
  }

  pub fn with_parts(
    config: Config,
    source: Arc<dyn ProductSource>,
    cache: ProductCache,
    settings: Box<dyn SettingsProvider>,
  ) -> Self {
    let catalog = CachedCatalog::new(source, cache, Aggregator::new(config.pricing.policy()));
    Self {
      config,
      catalog,
      settings,
    }
  }

  fn paginator(&self) -> Paginator {
    Paginator::new(
      &self.catalog,
      Arc::new(TokioSpawner),
      &self.config.pagination,
      self.config.api.timeout(),
    )
  }

  // ==========================================================================
  // Search
  // ==========================================================================

  /// Load up to `pages` pages of a search. An empty query lists popular products.
  pub async fn search(&self, query: &str, pages: usize, refresh: bool) -> Result<SearchReport> {
    let mut paginator = self.paginator();

    let previous = refresh.then(|| paginator.cached_items(query));
    if refresh {
      paginator.refresh(query);
    } else {
      paginator.load(query);
    }
    paginator.settle().await;

    if let Some(message) = paginator.error() {
      return Err(eyre!("{}", message));
    }

    for _ in 1..pages.max(1) {
      if paginator.is_last_page() {
        break;
      }
      let before = paginator.items().len();
      paginator.load_more();
      paginator.settle().await;
      if paginator.items().len() == before && !paginator.is_last_page() {
        warn!(query, loaded = before, "Stopped loading more pages");
        break;
      }
    }

    debug!(
      query = paginator.query(),
      page = paginator.current_page(),
      state = ?paginator.state(),
      "Search finished"
    );

    let changes = previous.map(|old| {
      let summary = DiffSummary::of(&diff::diff(&old, paginator.items()));
      info!(
        query,
        inserted = summary.inserted,
        removed = summary.removed,
        moved = summary.moved,
        updated = summary.updated,
        "Refreshed search"
      );
      summary
    });

    Ok(SearchReport {
      items: paginator.items().to_vec(),
      last_page: paginator.is_last_page(),
      changes,
    })
  }

  pub async fn run_search(&self, query: &str, pages: usize, refresh: bool) -> Result<()> {
    let report = self.search(query, pages, refresh).await?;
    let currency = self.currency();

    if query.trim().is_empty() {
      println!("Popular products");
    } else {
      println!("Results for \"{}\"", query.trim());
    }

    for product in &report.items {
      println!("{}", display::product_line(product, currency));
    }

    let more = if report.last_page {
      "all loaded"
    } else {
      "more available"
    };
    println!(
      "{} products ({}), prices in {}",
      report.items.len(),
      more,
      currency.code().to_uppercase()
    );

    if let Some(changes) = report.changes {
      if changes.is_empty() {
        println!("No changes since last load");
      } else {
        println!(
          "{} new, {} removed, {} moved, {} updated",
          changes.inserted, changes.removed, changes.moved, changes.updated
        );
      }
    }
    Ok(())
  }

  // ==========================================================================
  // Product detail
  // ==========================================================================

  pub async fn detail(&self, id: i64, refresh: bool) -> Result<ProductDetail> {
    if refresh {
      self.catalog.forget_detail(id);
    }
    self.catalog.product_detail(id).await.map_err(|e| {
      if e.is_connectivity() {
        warn!(id, error = %e, "Catalog unreachable");
      } else {
        error!(id, error = %e, "Failed to load product");
      }
      eyre!("{}", e.user_message())
    })
  }

  pub async fn run_show(&self, id: i64, refresh: bool) -> Result<()> {
    let detail = self.detail(id, refresh).await?;
    let currency = self.currency();
    let product = &detail.product;

    println!("{}", display::full_name(product));
    println!("Brand: {}", display::brand(product));
    println!("Model: {}", display::model(product));
    println!(
      "{}",
      product
        .description
        .as_deref()
        .unwrap_or(display::NO_DESCRIPTION)
    );
    println!(
      "Price: {} - {}",
      display::format_price(detail.min_price, currency),
      display::format_price(detail.max_price, currency)
    );
    println!("Cheapest at: {}", display::cheapest_shop(product));
    println!();
    print!("{}", display::offers_table(&detail.offers, currency));
    Ok(())
  }

  // ==========================================================================
  // Settings
  // ==========================================================================

  /// Selected display currency; storage errors fall back to the default.
  fn currency(&self) -> Currency {
    self.settings.currency().unwrap_or_else(|e| {
      warn!(error = %e, "Could not read currency setting");
      Currency::default()
    })
  }

  pub fn get_setting(&self, key: &str) -> Result<String> {
    self.settings.get(key.parse::<Setting>()?)
  }

  pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
    let key = key.parse::<Setting>()?;
    self.settings.set(key, value)?;
    info!(%key, "Setting updated");
    Ok(())
  }

  pub fn list_settings(&self) -> Result<Vec<(Setting, String)>> {
    self.settings.list()
  }

  pub fn print_stats(&self) {
    println!("Cache: {}", self.catalog.cache().stats());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::api_types::{
    ApiPrice, ApiProduct, ApiProductPage, ApiProductWithPrices,
  };
  use crate::catalog::error::FetchError;
  use crate::catalog::source::PageRequest;
  use async_trait::async_trait;
  use std::sync::Mutex;

  /// Serves `total` products for any search; prices can be bumped between calls.
  struct ShopSource {
    total: usize,
    markup: Mutex<f64>,
    offsets: Mutex<Vec<usize>>,
  }

  impl ShopSource {
    fn new(total: usize) -> Arc<Self> {
      Arc::new(Self {
        total,
        markup: Mutex::new(0.0),
        offsets: Mutex::new(Vec::new()),
      })
    }

    fn item(&self, id: i64) -> ApiProductWithPrices {
      let markup = *self.markup.lock().unwrap();
      ApiProductWithPrices {
        product: ApiProduct {
          id,
          title: Some(format!("Product {}", id)),
          ..Default::default()
        },
        prices: vec![
          ApiPrice {
            price: 100.0 + markup,
            shop_name: "A".to_string(),
            ..Default::default()
          },
          ApiPrice {
            price: 80.0 + markup,
            shop_name: "B".to_string(),
            ..Default::default()
          },
        ],
        min_price: None,
        max_price: None,
      }
    }
  }

  #[async_trait]
  impl ProductSource for ShopSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<ApiProductPage, FetchError> {
      self.offsets.lock().unwrap().push(request.offset);
      let end = (request.offset + request.limit).min(self.total);
      let items = (request.offset..end).map(|i| self.item(i as i64 + 1)).collect();
      Ok(ApiProductPage {
        items,
        total: self.total as u64,
      })
    }

    async fn fetch_popular(&self, limit: usize) -> Result<ApiProductPage, FetchError> {
      let items = (1..=limit.min(self.total)).map(|id| self.item(id as i64)).collect();
      Ok(ApiProductPage {
        items,
        total: self.total as u64,
      })
    }

    async fn fetch_product(&self, id: i64) -> Result<ApiProductWithPrices, FetchError> {
      if id as usize > self.total {
        return Err(FetchError::NotFound);
      }
      Ok(self.item(id))
    }
  }

  fn config(preload: bool) -> Config {
    Config {
      pagination: crate::config::PaginationConfig {
        preload,
        ..Default::default()
      },
      ..Default::default()
    }
  }

  fn app_with(source: Arc<ShopSource>, config: Config, cache: ProductCache) -> App {
    App::with_parts(config, source, cache, Box::new(MemorySettings::default()))
  }

  fn app(total: usize) -> (App, Arc<ShopSource>) {
    let source = ShopSource::new(total);
    let config = config(false);
    let cache = ProductCache::new(&config.cache);
    (app_with(source.clone(), config, cache), source)
  }

  #[tokio::test]
  async fn test_search_loads_requested_pages() {
    let (app, _) = app(45);

    let report = app.search("phone", 2, false).await.unwrap();
    assert_eq!(report.items.len(), 40);
    assert!(!report.last_page);
    assert!(report.changes.is_none());

    let report = app.search("phone", 5, false).await.unwrap();
    assert_eq!(report.items.len(), 45);
    assert!(report.last_page);
  }

  #[tokio::test]
  async fn test_search_uses_cheapest_offer() {
    let (app, _) = app(3);
    let report = app.search("phone", 1, false).await.unwrap();
    assert_eq!(report.items[0].price, Some(80.0));
    assert_eq!(report.items[0].cheapest_shop.as_deref(), Some("B"));
  }

  #[tokio::test]
  async fn test_refresh_reports_changes() {
    let (app, source) = app(5);
    app.search("phone", 1, false).await.unwrap();

    *source.markup.lock().unwrap() = 10.0;
    let cached = app.search("phone", 1, false).await.unwrap();
    assert_eq!(cached.items[0].price, Some(80.0));

    let refreshed = app.search("phone", 1, true).await.unwrap();
    assert_eq!(refreshed.items[0].price, Some(90.0));
    assert_eq!(
      refreshed.changes,
      Some(DiffSummary {
        updated: 5,
        ..Default::default()
      })
    );
  }

  #[tokio::test]
  async fn test_refresh_compares_with_previous_run() {
    let dir = std::env::temp_dir().join(format!("pricewatch-app-{}", std::process::id()));
    let path = dir.join("cache.db");
    let _ = std::fs::remove_dir_all(&dir);
    let source = ShopSource::new(5);

    let first = {
      let config = config(false);
      let cache = ProductCache::persistent(&config.cache, &SqliteCache::open_at(&path).unwrap());
      app_with(source.clone(), config, cache)
    };
    first.search("phone", 1, false).await.unwrap();
    drop(first);

    *source.markup.lock().unwrap() = 10.0;

    let config = config(false);
    let cache = ProductCache::persistent(&config.cache, &SqliteCache::open_at(&path).unwrap());
    let second = app_with(source.clone(), config, cache);
    assert_eq!(second.catalog.cache().stats().lists, 1);

    let refreshed = second.search("phone", 1, true).await.unwrap();
    assert_eq!(refreshed.items[0].price, Some(90.0));
    assert_eq!(
      refreshed.changes,
      Some(DiffSummary {
        updated: 5,
        ..Default::default()
      })
    );
    assert_eq!(source.offsets.lock().unwrap().len(), 2);

    drop(second);
    let _ = std::fs::remove_dir_all(dir);
  }

  #[tokio::test]
  async fn test_preloaded_pages_are_fetched_once() {
    let source = ShopSource::new(70);
    let config = config(true);
    let cache = ProductCache::new(&config.cache);
    let app = app_with(source.clone(), config, cache);

    let report = app.search("phone", 4, false).await.unwrap();
    assert_eq!(report.items.len(), 70);

    let mut offsets = source.offsets.lock().unwrap().clone();
    let fetched = offsets.len();
    offsets.sort_unstable();
    offsets.dedup();
    assert_eq!(offsets.len(), fetched);
    assert_eq!(offsets, vec![0, 20, 40, 60]);
  }

  #[tokio::test]
  async fn test_empty_query_lists_popular() {
    let (app, _) = app(50);
    let report = app.search("", 3, false).await.unwrap();
    assert_eq!(report.items.len(), 10);
    assert!(report.last_page);
  }

  #[tokio::test]
  async fn test_detail_not_found_is_user_message() {
    let (app, _) = app(2);
    assert_eq!(app.detail(1, false).await.unwrap().offers.len(), 2);
    let err = app.detail(99, false).await.unwrap_err();
    assert_eq!(err.to_string(), "Product not found.");
  }

  #[tokio::test]
  async fn test_show_refresh_refetches_detail() {
    let (app, source) = app(2);
    let before = app.detail(2, false).await.unwrap();
    assert_eq!(before.min_price, Some(80.0));

    *source.markup.lock().unwrap() = 5.0;
    assert_eq!(app.detail(2, false).await.unwrap().min_price, Some(80.0));
    assert_eq!(app.detail(2, true).await.unwrap().min_price, Some(85.0));
  }

  #[test]
  fn test_settings_round_trip() {
    let (app, _) = app(1);
    app.set_setting("currency", "eur").unwrap();
    assert_eq!(app.get_setting("currency").unwrap(), "eur");
    assert_eq!(app.currency(), Currency::Eur);
    assert!(app.set_setting("volume", "11").is_err());
    assert_eq!(app.list_settings().unwrap().len(), 3);
  }
}
