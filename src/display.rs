//! Human-readable rendering of products and prices.
//!
//! Missing data is carried as `None` everywhere else; the fixed fallback
//! strings only appear here.

use std::fmt::Write;

use crate::catalog::types::{Product, ShopOffer};

pub const UNSPECIFIED: &str = "unspecified";
pub const UNSPECIFIED_MODEL: &str = "unspecified model";
pub const PRICE_NOT_AVAILABLE: &str = "price not available";
pub const NO_DESCRIPTION: &str = "no description";

/// Currency used for showing prices. Server prices are in roubles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Currency {
  #[default]
  Rub,
  Usd,
  Eur,
}

impl Currency {
  /// Parse a stored setting value; unknown codes fall back to roubles.
  pub fn from_code(code: &str) -> Self {
    match code.trim().to_lowercase().as_str() {
      "usd" => Self::Usd,
      "eur" => Self::Eur,
      _ => Self::Rub,
    }
  }

  pub fn code(self) -> &'static str {
    match self {
      Self::Rub => "rub",
      Self::Usd => "usd",
      Self::Eur => "eur",
    }
  }

  pub fn symbol(self) -> &'static str {
    match self {
      Self::Rub => "₽",
      Self::Usd => "$",
      Self::Eur => "€",
    }
  }

  /// Fixed conversion rate from roubles
  pub fn rate(self) -> f64 {
    match self {
      Self::Rub => 1.0,
      Self::Usd => 0.011,
      Self::Eur => 0.010,
    }
  }

  fn decimals(self) -> usize {
    match self {
      Self::Rub => 0,
      Self::Usd | Self::Eur => 2,
    }
  }
}

/// Format a rouble price in the given currency, e.g. `"12,990 ₽"`.
pub fn format_price(price: Option<f64>, currency: Currency) -> String {
  match price {
    Some(p) if p.is_finite() && p > 0.0 => {
      let converted = p * currency.rate();
      format!(
        "{} {}",
        group_thousands(converted, currency.decimals()),
        currency.symbol()
      )
    }
    _ => PRICE_NOT_AVAILABLE.to_string(),
  }
}

fn group_thousands(value: f64, decimals: usize) -> String {
  let formatted = format!("{:.*}", decimals, value);
  let (int_part, frac_part) = match formatted.split_once('.') {
    Some((i, f)) => (i, Some(f)),
    None => (formatted.as_str(), None),
  };

  let (sign, digits) = match int_part.strip_prefix('-') {
    Some(rest) => ("-", rest),
    None => ("", int_part),
  };

  let mut grouped = String::with_capacity(formatted.len() + digits.len() / 3);
  grouped.push_str(sign);
  for (i, ch) in digits.chars().enumerate() {
    if i > 0 && (digits.len() - i) % 3 == 0 {
      grouped.push(',');
    }
    grouped.push(ch);
  }
  if let Some(frac) = frac_part {
    grouped.push('.');
    grouped.push_str(frac);
  }
  grouped
}

/// "Brand Model" when both are known, otherwise the title.
pub fn full_name(product: &Product) -> String {
  match (&product.brand, &product.model) {
    (Some(brand), Some(model)) => format!("{} {}", brand, model),
    _ => product.title.clone(),
  }
}

pub fn brand(product: &Product) -> &str {
  product.brand.as_deref().unwrap_or(UNSPECIFIED)
}

pub fn model(product: &Product) -> &str {
  product.model.as_deref().unwrap_or(UNSPECIFIED_MODEL)
}

pub fn cheapest_shop(product: &Product) -> &str {
  product.cheapest_shop.as_deref().unwrap_or(UNSPECIFIED)
}

/// Where the product can be bought, as one line.
pub fn shop_summary(product: &Product) -> String {
  match (&product.cheapest_shop, product.shop_count) {
    (_, n) if n > 1 => format!("available in {} shops", n),
    (Some(shop), _) => format!("available at {}", shop),
    _ => "no shop information".to_string(),
  }
}

/// One list row: name, price and shop summary.
pub fn product_line(product: &Product, currency: Currency) -> String {
  format!(
    "#{:<6} {}  {}  ({})",
    product.id,
    full_name(product),
    format_price(product.price, currency),
    shop_summary(product)
  )
}

/// Table of shop offers, cheapest first.
pub fn offers_table(offers: &[ShopOffer], currency: Currency) -> String {
  let mut out = String::new();
  for offer in offers {
    let marker = if offer.is_cheapest { "*" } else { " " };
    let _ = write!(
      out,
      "{} {:<24} {:>14}",
      marker,
      offer.shop_name,
      format_price(Some(offer.price), currency)
    );
    if offer.savings > 0.0 {
      let _ = write!(out, "  save {}", format_price(Some(offer.savings), currency));
    }
    if let Some(url) = &offer.url {
      let _ = write!(out, "  {}", url);
    }
    out.push('\n');
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn product() -> Product {
    Product {
      id: 1,
      title: "Phone".to_string(),
      brand: None,
      model: None,
      description: None,
      image: None,
      price: Some(12990.0),
      shop_count: 1,
      cheapest_shop: Some("Shop".to_string()),
      url: None,
    }
  }

  #[test]
  fn test_format_price_rub() {
    assert_eq!(format_price(Some(12990.0), Currency::Rub), "12,990 ₽");
    assert_eq!(format_price(Some(999.4), Currency::Rub), "999 ₽");
    assert_eq!(format_price(Some(1234567.0), Currency::Rub), "1,234,567 ₽");
  }

  #[test]
  fn test_format_price_converted() {
    assert_eq!(format_price(Some(100000.0), Currency::Usd), "1,100.00 $");
    assert_eq!(format_price(Some(1000.0), Currency::Eur), "10.00 €");
  }

  #[test]
  fn test_format_missing_price() {
    assert_eq!(format_price(None, Currency::Rub), PRICE_NOT_AVAILABLE);
    assert_eq!(format_price(Some(0.0), Currency::Usd), PRICE_NOT_AVAILABLE);
  }

  #[test]
  fn test_currency_codes() {
    assert_eq!(Currency::from_code("USD"), Currency::Usd);
    assert_eq!(Currency::from_code("eur"), Currency::Eur);
    assert_eq!(Currency::from_code("yen"), Currency::Rub);
    assert_eq!(Currency::Usd.code(), "usd");
  }

  #[test]
  fn test_names_and_sentinels() {
    let mut p = product();
    assert_eq!(full_name(&p), "Phone");
    assert_eq!(brand(&p), UNSPECIFIED);
    assert_eq!(model(&p), UNSPECIFIED_MODEL);

    p.brand = Some("Acme".to_string());
    p.model = Some("X1".to_string());
    assert_eq!(full_name(&p), "Acme X1");
  }

  #[test]
  fn test_shop_summary() {
    let mut p = product();
    assert_eq!(shop_summary(&p), "available at Shop");
    p.shop_count = 3;
    assert_eq!(shop_summary(&p), "available in 3 shops");
    p.shop_count = 0;
    p.cheapest_shop = None;
    assert_eq!(shop_summary(&p), "no shop information");
    assert_eq!(cheapest_shop(&p), UNSPECIFIED);
  }
}
