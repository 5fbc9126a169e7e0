//! Persisted user preferences: theme, language and display currency.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::display::Currency;

/// A known preference key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
  Theme,
  Language,
  Currency,
}

impl Setting {
  pub const ALL: [Setting; 3] = [Setting::Theme, Setting::Language, Setting::Currency];

  pub fn key(self) -> &'static str {
    match self {
      Setting::Theme => "theme",
      Setting::Language => "language",
      Setting::Currency => "currency",
    }
  }

  pub fn default_value(self) -> &'static str {
    match self {
      Setting::Theme => "system",
      Setting::Language => "ru",
      Setting::Currency => "rub",
    }
  }

  pub fn allowed(self) -> &'static [&'static str] {
    match self {
      Setting::Theme => &["system", "light", "dark"],
      Setting::Language => &["ru", "en"],
      Setting::Currency => &["rub", "usd", "eur"],
    }
  }

  /// Normalize and check a value for this key.
  pub fn validate(self, value: &str) -> Result<String> {
    let value = value.trim().to_lowercase();
    if self.allowed().contains(&value.as_str()) {
      Ok(value)
    } else {
      Err(eyre!(
        "Invalid value '{}' for {} (expected one of: {})",
        value,
        self.key(),
        self.allowed().join(", ")
      ))
    }
  }
}

impl fmt::Display for Setting {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.key())
  }
}

impl FromStr for Setting {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    Setting::ALL
      .into_iter()
      .find(|setting| setting.key() == s.trim())
      .ok_or_else(|| eyre!("Unknown setting '{}'", s))
  }
}

/// String-keyed preference store.
pub trait SettingsProvider: Send + Sync {
  /// Stored value, or the key's default when unset.
  fn get(&self, key: Setting) -> Result<String>;

  /// Validate and store a value.
  fn set(&self, key: Setting, value: &str) -> Result<()>;

  fn list(&self) -> Result<Vec<(Setting, String)>> {
    Setting::ALL
      .into_iter()
      .map(|key| Ok((key, self.get(key)?)))
      .collect()
  }

  /// Display currency, falling back to RUB for unknown codes.
  fn currency(&self) -> Result<Currency> {
    Ok(Currency::from_code(&self.get(Setting::Currency)?))
  }
}

// ============================================================================
// SQLite
// ============================================================================

const SETTINGS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Settings stored in `settings.db` under the data directory.
pub struct SqliteSettings {
  conn: Mutex<Connection>,
}

impl SqliteSettings {
  /// Open or create the settings database at the default location.
  pub fn open() -> Result<Self> {
    let path = Config::data_dir()?.join("settings.db");
    Self::open_at(&path)
  }

  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create settings directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open settings database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory settings database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SETTINGS_SCHEMA)
      .map_err(|e| eyre!("Failed to run settings migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl SettingsProvider for SqliteSettings {
  fn get(&self, key: Setting) -> Result<String> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let stored: Option<String> = conn
      .query_row(
        "SELECT value FROM settings WHERE key = ?",
        params![key.key()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read setting {}: {}", key, e))?;

    Ok(stored.unwrap_or_else(|| key.default_value().to_string()))
  }

  fn set(&self, key: Setting, value: &str) -> Result<()> {
    let value = key.validate(value)?;
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key.key(), value],
      )
      .map_err(|e| eyre!("Failed to store setting {}: {}", key, e))?;

    debug!(%key, %value, "Setting stored");
    Ok(())
  }
}

// ============================================================================
// In-memory
// ============================================================================

/// Non-persistent settings, used when no data directory is available.
#[derive(Debug, Default)]
pub struct MemorySettings {
  values: Mutex<HashMap<Setting, String>>,
}

impl SettingsProvider for MemorySettings {
  fn get(&self, key: Setting) -> Result<String> {
    let values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      values
        .get(&key)
        .cloned()
        .unwrap_or_else(|| key.default_value().to_string()),
    )
  }

  fn set(&self, key: Setting, value: &str) -> Result<()> {
    let value = key.validate(value)?;
    self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .insert(key, value);
    Ok(())
  }
}
