//! Paged product loading for one search at a time.
//!
//! A `Paginator` owns the accumulated product list of the current search and
//! its loading state. Fetches run on a `Spawner`; results come back over a
//! channel and are applied by `poll()` or `settle()` on the owner's side, so
//! state only changes where the paginator is owned.
//!
//! ```ignore
//! let mut pages = Paginator::new(&catalog, Arc::new(TokioSpawner), &config.pagination, timeout);
//!
//! pages.load("phone");
//! pages.settle().await;
//!
//! // Scrolled near the end
//! pages.load_more();
//! pages.settle().await;
//! ```
//!
//! Every `load` bumps a generation counter; completions from an older
//! generation are discarded when they arrive.
//!
//! Preloads also report back over the channel. A `load_more` for a page whose
//! preload is still running waits for that preload instead of fetching again.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::{ListKey, ProductCache};
use crate::catalog::aggregate::Aggregator;
use crate::catalog::api_types::ApiProductPage;
use crate::catalog::cached_client::CachedCatalog;
use crate::catalog::error::FetchError;
use crate::catalog::source::{PageRequest, ProductSource};
use crate::catalog::types::{Product, ProductPage};
use crate::config::PaginationConfig;

/// A boxed background task
pub type Task = BoxFuture<'static, ()>;

/// Runs background fetch tasks.
pub trait Spawner: Send + Sync {
  fn spawn(&self, task: Task);
}

/// Spawner backed by the tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl Spawner for TokioSpawner {
  fn spawn(&self, task: Task) {
    tokio::spawn(task);
  }
}

/// Loading state of the current search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageState {
  /// Loaded, more pages may follow
  Idle,
  /// First page is being fetched
  Loading,
  /// A following page is being fetched
  LoadingMore,
  /// Every page has been loaded
  LastPage,
  /// First page failed; holds the user-facing message
  Error(String),
}

#[derive(Debug, Clone, Copy)]
enum Request {
  Load,
  LoadMore { page: usize },
  Preload { page: usize },
}

#[derive(Debug)]
struct Completion {
  generation: u64,
  request: Request,
  result: Result<ProductPage, FetchError>,
}

/// Everything a background fetch needs, cheap to clone into a task.
#[derive(Clone)]
struct Fetcher {
  source: Arc<dyn ProductSource>,
  cache: ProductCache,
  aggregator: Arc<Aggregator>,
  timeout: Duration,
}

impl Fetcher {
  /// Fetch, convert and cache one page unless a live copy is cached.
  async fn page(self, key: ListKey) -> Result<ProductPage, FetchError> {
    let cache = self.cache.clone();
    let result = cache
      .fetch_list(key.clone(), || async move {
        let raw = tokio::time::timeout(self.timeout, self.request(&key))
          .await
          .map_err(|_| FetchError::Timeout)??;

        let fetched = raw.items.len();
        debug!(%key, fetched, total = raw.total, "Fetched product page");
        let products = self.aggregator.convert_all(&raw.items);
        if products.len() < fetched {
          warn!(
            %key,
            dropped = fetched - products.len(),
            "Some products could not be converted"
          );
        }
        Ok::<_, FetchError>(ProductPage { products, fetched })
      })
      .await?;
    Ok(result.data)
  }

  async fn request(&self, key: &ListKey) -> Result<ApiProductPage, FetchError> {
    if key.query.is_empty() {
      self.source.fetch_popular(key.limit).await
    } else {
      let request = PageRequest {
        search: key.query.clone(),
        offset: key.offset,
        limit: key.limit,
      };
      self.source.fetch_page(&request).await
    }
  }
}

/// Pagination controller for product searches.
pub struct Paginator {
  fetcher: Fetcher,
  spawner: Arc<dyn Spawner>,
  page_size: usize,
  popular_limit: usize,
  preload: bool,

  query: String,
  state: PageState,
  /// Index of the last page merged into `items`
  current_page: usize,
  items: Vec<Product>,

  generation: u64,
  /// Outstanding fetches `settle` waits for, including an awaited preload
  in_flight: usize,
  /// Page whose preload is running
  preloading: Option<usize>,
  /// `load_more` is waiting on the running preload
  awaiting_preload: bool,
  tx: mpsc::UnboundedSender<Completion>,
  rx: mpsc::UnboundedReceiver<Completion>,
}

impl Paginator {
  pub fn new(
    catalog: &CachedCatalog,
    spawner: Arc<dyn Spawner>,
    config: &PaginationConfig,
    timeout: Duration,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      fetcher: Fetcher {
        source: catalog.source(),
        cache: catalog.cache().clone(),
        aggregator: catalog.aggregator(),
        timeout,
      },
      spawner,
      page_size: config.page_size.max(1),
      popular_limit: config.popular_limit.max(1),
      preload: config.preload,
      query: String::new(),
      state: PageState::Idle,
      current_page: 0,
      items: Vec::new(),
      generation: 0,
      in_flight: 0,
      preloading: None,
      awaiting_preload: false,
      tx,
      rx,
    }
  }

  pub fn state(&self) -> &PageState {
    &self.state
  }

  pub fn items(&self) -> &[Product] {
    &self.items
  }

  pub fn query(&self) -> &str {
    &self.query
  }

  pub fn current_page(&self) -> usize {
    self.current_page
  }

  pub fn is_last_page(&self) -> bool {
    self.state == PageState::LastPage
  }

  pub fn error(&self) -> Option<&str> {
    match &self.state {
      PageState::Error(msg) => Some(msg),
      _ => None,
    }
  }

  /// An empty query lists popular products, which fit on a single page.
  fn is_popular(&self) -> bool {
    self.query.is_empty()
  }

  fn page_key(&self, page: usize) -> ListKey {
    self.key_for(&self.query, page)
  }

  fn key_for(&self, query: &str, page: usize) -> ListKey {
    if query.is_empty() {
      ListKey::new("", 0, self.popular_limit)
    } else {
      ListKey::new(query, page * self.page_size, self.page_size)
    }
  }

  /// Products of a search still held in the cache, in page order.
  ///
  /// Stops at the first page that is missing or expired.
  pub fn cached_items(&self, query: &str) -> Vec<Product> {
    let query = query.trim();
    let mut items = Vec::new();
    for page in 0.. {
      let Some(entry) = self.fetcher.cache.get_list(&self.key_for(query, page)) else {
        break;
      };
      let last = query.is_empty() || entry.value.is_last(self.page_size);
      items.extend(entry.value.products);
      if last {
        break;
      }
    }
    items
  }

  /// Start a new search, discarding everything loaded so far.
  pub fn load(&mut self, query: &str) {
    self.generation += 1;
    self.forget_preload();
    self.query = query.trim().to_string();
    self.current_page = 0;
    self.items.clear();
    self.state = PageState::Loading;

    let key = self.page_key(0);
    if let Some(cached) = self.fetcher.cache.get_list(&key) {
      debug!(query = %self.query, "First page served from cache");
      self.apply_first_page(cached.value);
      return;
    }

    info!(query = %self.query, "Loading products");
    self.spawn_fetch(key, Request::Load);
  }

  /// Drop cached pages of the search and load it again.
  pub fn refresh(&mut self, query: &str) {
    self.fetcher.cache.invalidate_query(query.trim());
    self.load(query);
  }

  /// Fetch the page after the current one and append it.
  ///
  /// Only acts once the first page has loaded and more pages remain.
  pub fn load_more(&mut self) {
    if self.state != PageState::Idle {
      debug!(state = ?self.state, "Ignoring load_more");
      return;
    }

    let page = self.current_page + 1;
    self.state = PageState::LoadingMore;

    let key = self.page_key(page);
    if let Some(cached) = self.fetcher.cache.get_list(&key) {
      debug!(query = %self.query, page, "Next page served from cache");
      self.apply_more(page, cached.value);
      return;
    }

    if self.preloading == Some(page) {
      debug!(query = %self.query, page, "Waiting for running preload");
      self.awaiting_preload = true;
      self.in_flight += 1;
      return;
    }

    self.spawn_fetch(key, Request::LoadMore { page });
  }

  /// Warm the cache with the page after the current one.
  ///
  /// Never touches the loaded list or state; failures are dropped.
  pub fn preload_next_page(&mut self) {
    if self.is_popular() || self.state != PageState::Idle {
      return;
    }

    let page = self.current_page + 1;
    if self.preloading == Some(page) {
      return;
    }
    let key = self.page_key(page);
    if self.fetcher.cache.get_list(&key).is_some() {
      return;
    }

    self.preloading = Some(page);
    self.spawn_fetch(key, Request::Preload { page });
  }

  /// Stop tracking the running preload; its completion will be ignored.
  fn forget_preload(&mut self) {
    if self.awaiting_preload {
      self.in_flight = self.in_flight.saturating_sub(1);
    }
    self.awaiting_preload = false;
    self.preloading = None;
  }

  fn spawn_fetch(&mut self, key: ListKey, request: Request) {
    let fetcher = self.fetcher.clone();
    let tx = self.tx.clone();
    let generation = self.generation;
    // Preloads only count once something waits on them
    if !matches!(request, Request::Preload { .. }) {
      self.in_flight += 1;
    }

    self.spawner.spawn(Box::pin(async move {
      let result = fetcher.page(key).await;
      // Ignore send errors - the paginator may have been dropped
      let _ = tx.send(Completion {
        generation,
        request,
        result,
      });
    }));
  }

  /// Apply any finished fetches without waiting.
  ///
  /// Returns `true` if state changed.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while let Ok(completion) = self.rx.try_recv() {
      changed |= self.apply(completion);
    }
    changed
  }

  /// Wait until every outstanding fetch has been applied or discarded.
  pub async fn settle(&mut self) {
    self.poll();
    while self.in_flight > 0 {
      match self.rx.recv().await {
        Some(completion) => {
          self.apply(completion);
        }
        None => break,
      }
    }
  }

  fn apply(&mut self, completion: Completion) -> bool {
    if let Request::Preload { page } = completion.request {
      return self.apply_preload(completion.generation, page, completion.result);
    }
    self.in_flight = self.in_flight.saturating_sub(1);

    if completion.generation != self.generation {
      debug!(
        generation = completion.generation,
        current = self.generation,
        "Discarding stale page"
      );
      return false;
    }

    match (completion.request, completion.result) {
      (Request::Load, Ok(page)) => self.apply_first_page(page),
      (Request::Load, Err(e)) => {
        error!(query = %self.query, error = %e, "Failed to load products");
        self.state = PageState::Error(e.user_message());
      }
      (Request::LoadMore { page }, Ok(products)) => self.apply_more(page, products),
      (Request::LoadMore { page }, Err(e)) => {
        warn!(query = %self.query, page, error = %e, "Failed to load more products");
        self.state = PageState::Idle;
      }
      (Request::Preload { .. }, _) => return false,
    }
    true
  }

  fn apply_preload(
    &mut self,
    generation: u64,
    page: usize,
    result: Result<ProductPage, FetchError>,
  ) -> bool {
    if generation != self.generation || self.preloading != Some(page) {
      return false;
    }
    self.preloading = None;

    if !self.awaiting_preload {
      if let Err(e) = result {
        debug!(query = %self.query, page, error = %e, "Preload failed");
      }
      return false;
    }

    self.awaiting_preload = false;
    self.in_flight = self.in_flight.saturating_sub(1);
    match result {
      Ok(products) => {
        self.apply_more(page, products);
        true
      }
      Err(e) => {
        debug!(query = %self.query, page, error = %e, "Preload failed, fetching page");
        let key = self.page_key(page);
        self.spawn_fetch(key, Request::LoadMore { page });
        false
      }
    }
  }

  fn apply_first_page(&mut self, page: ProductPage) {
    let last = self.is_popular() || page.is_last(self.page_size);
    self.items = page.products;
    self.current_page = 0;
    self.state = if last {
      PageState::LastPage
    } else {
      PageState::Idle
    };
    info!(query = %self.query, count = self.items.len(), last, "Loaded first page");

    if self.preload && !last {
      self.preload_next_page();
    }
  }

  fn apply_more(&mut self, page_index: usize, page: ProductPage) {
    if self.preloading == Some(page_index) {
      self.preloading = None;
    }
    let last = page.is_last(self.page_size);
    self.items.extend(page.products);
    self.current_page = page_index;
    self.state = if last {
      PageState::LastPage
    } else {
      PageState::Idle
    };
    info!(
      query = %self.query,
      page = page_index,
      total = self.items.len(),
      last,
      "Loaded more products"
    );

    if self.preload && !last {
      self.preload_next_page();
    }
  }
}

impl std::fmt::Debug for Paginator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Paginator")
      .field("query", &self.query)
      .field("state", &self.state)
      .field("current_page", &self.current_page)
      .field("items", &self.items.len())
      .field("generation", &self.generation)
      .finish_non_exhaustive()
  }
}
