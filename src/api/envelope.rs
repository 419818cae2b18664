//! Response envelopes.
//!
//! These shapes stay the same whichever fallback strategy produced the data,
//! so callers never branch on where a result came from.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ApiError;
use crate::market::types::{Category, UserRef};

/// Paginated collection: `{success, count, total, pages, currentPage, data}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEnvelope<T> {
  #[serde(default = "yes")]
  pub success: bool,
  #[serde(default)]
  pub count: usize,
  #[serde(default)]
  pub total: u64,
  #[serde(default = "one")]
  pub pages: u32,
  #[serde(default = "one")]
  pub current_page: u32,
  #[serde(default = "Vec::new")]
  pub data: Vec<T>,
}

impl<T> ListEnvelope<T> {
  /// A single-page envelope around locally derived or synthetic items.
  pub fn single_page(data: Vec<T>) -> Self {
    Self {
      success: true,
      count: data.len(),
      total: data.len() as u64,
      pages: 1,
      current_page: 1,
      data,
    }
  }
}

/// Single entity: `{success, data, user?}`. Offer-bearing task responses use
/// the same envelope with `Task::offers` populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEnvelope<T> {
  #[serde(default = "yes")]
  pub success: bool,
  pub data: T,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user: Option<UserRef>,
}

impl<T> ItemEnvelope<T> {
  pub fn new(data: T) -> Self {
    Self {
      success: true,
      data,
      user: None,
    }
  }
}

/// Generic write result: `{success, data}`. `demo` marks a locally
/// substituted success that no server has seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEnvelope<T> {
  #[serde(default = "yes")]
  pub success: bool,
  pub data: T,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub demo: bool,
}

impl<T> MutationEnvelope<T> {
  pub fn new(data: T) -> Self {
    Self {
      success: true,
      data,
      demo: false,
    }
  }

  pub fn demo(data: T) -> Self {
    Self {
      success: true,
      data,
      demo: true,
    }
  }
}

/// Categories: `{success, data: [{name, count}], total}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEnvelope {
  #[serde(default = "yes")]
  pub success: bool,
  #[serde(default)]
  pub data: Vec<Category>,
  #[serde(default)]
  pub total: u64,
}

impl CategoryEnvelope {
  pub fn new(data: Vec<Category>) -> Self {
    let total = data.len() as u64;
    Self {
      success: true,
      data,
      total,
    }
  }
}

/// Decode a response body into an envelope type.
pub fn decode<T: DeserializeOwned>(data: Value) -> Result<T, ApiError> {
  Ok(serde_json::from_value(data)?)
}

fn yes() -> bool {
  true
}

fn one() -> u32 {
  1
}
