use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use color_eyre::{eyre::eyre, Result};

use crate::config::Config;

use super::api_types::{ApiProductPage, ApiProductWithPrices};
use super::error::FetchError;
use super::source::{PageRequest, ProductSource};

/// HTTP client for the catalog API
#[derive(Clone)]
pub struct CatalogClient {
  http: reqwest::Client,
  base_url: Url,
  popular_category: String,
}

impl CatalogClient {
  pub fn new(config: &Config) -> Result<Self> {
    let base_url = base_url(&config.api.url)?;

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Some(token) = Config::get_api_token() {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| eyre!("Invalid API token: {}", e))?;
      headers.insert(AUTHORIZATION, value);
    }

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .connect_timeout(config.api.timeout())
      .timeout(config.api.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      popular_category: config.pagination.popular_category.clone(),
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
    self
      .base_url
      .join(path)
      .map_err(|e| FetchError::Network(format!("invalid endpoint {}: {}", path, e)))
  }

  async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
    debug!(%url, "GET");
    let response = self.http.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::from_status(status.as_u16()));
    }

    response
      .json::<T>()
      .await
      .map_err(|e| FetchError::Decode(e.to_string()))
  }
}

/// Parse the configured base url so relative endpoints join under it.
fn base_url(raw: &str) -> Result<Url> {
  let mut url = Url::parse(raw).map_err(|e| eyre!("Invalid API url {}: {}", raw, e))?;
  // Relative joins drop the last path segment unless the base ends in '/'
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}

#[async_trait]
impl ProductSource for CatalogClient {
  async fn fetch_page(&self, request: &PageRequest) -> Result<ApiProductPage, FetchError> {
    let mut url = self.endpoint("products")?;
    {
      let mut query = url.query_pairs_mut();
      query
        .append_pair("skip", &request.offset.to_string())
        .append_pair("limit", &request.limit.to_string());
      if !request.search.is_empty() {
        query.append_pair("search", &request.search);
      }
    }
    self.get_json(url).await
  }

  async fn fetch_popular(&self, limit: usize) -> Result<ApiProductPage, FetchError> {
    let mut url = self.endpoint("products/popular")?;
    url
      .query_pairs_mut()
      .append_pair("limit", &limit.to_string())
      .append_pair("use_cache", "true")
      .append_pair("category", &self.popular_category);
    self.get_json(url).await
  }

  async fn fetch_product(&self, id: i64) -> Result<ApiProductWithPrices, FetchError> {
    let url = self.endpoint(&format!("products/{}", id))?;
    self.get_json(url).await
  }
}
