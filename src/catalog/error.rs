//! Error types for catalog fetching and product conversion.

use thiserror::Error;

/// Failure of a remote catalog request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  #[error("request timed out")]
  Timeout,

  #[error("network error: {0}")]
  Network(String),

  #[error("unauthorized (401)")]
  Unauthorized,

  #[error("not found (404)")]
  NotFound,

  #[error("server error ({status})")]
  Server { status: u16 },

  #[error("unexpected status ({status})")]
  Status { status: u16 },

  #[error("invalid response body: {0}")]
  Decode(String),
}

impl FetchError {
  /// Classify a non-success HTTP status.
  pub fn from_status(status: u16) -> Self {
    match status {
      401 => Self::Unauthorized,
      404 => Self::NotFound,
      500..=599 => Self::Server { status },
      _ => Self::Status { status },
    }
  }

  /// Whether the failure came from connectivity rather than the server.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, Self::Timeout | Self::Network(_))
  }

  /// Message suitable for showing to the user.
  pub fn user_message(&self) -> String {
    match self {
      Self::Timeout | Self::Network(_) => {
        "Could not reach the server. Check your connection and try again.".to_string()
      }
      Self::Unauthorized => "Your session has expired. Please sign in again.".to_string(),
      Self::NotFound => "Product not found.".to_string(),
      Self::Server { status } => format!("Server error ({}). Please try again later.", status),
      Self::Status { status } => format!("Failed to load products ({}).", status),
      Self::Decode(_) => "The server sent an unexpected response.".to_string(),
    }
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      Self::Timeout
    } else if e.is_decode() {
      Self::Decode(e.to_string())
    } else if let Some(status) = e.status() {
      Self::from_status(status.as_u16())
    } else {
      Self::Network(e.to_string())
    }
  }
}

/// A single raw product that cannot be turned into a display product.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
  #[error("invalid product id {0}")]
  InvalidId(i64),

  #[error("product {id} has a non-finite price")]
  InvalidPrice { id: i64 },
}
