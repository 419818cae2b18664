//! Marketplace entities as the server sends them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A posted task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  #[serde(alias = "_id")]
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub details: String,
  #[serde(default)]
  pub categories: Vec<String>,
  pub budget: Money,
  #[serde(default)]
  pub status: TaskStatus,
  #[serde(default)]
  pub location: Location,
  #[serde(default)]
  pub date: DateSpec,
  #[serde(default)]
  pub offer_count: u32,
  #[serde(default)]
  pub creator: UserRef,
  /// Only present on offer-bearing responses or when a server embeds them.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub offers: Vec<Offer>,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
  /// Set on records produced locally for demo/offline use.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub demo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
  pub amount: f64,
  #[serde(default = "default_currency")]
  pub currency: String,
}

fn default_currency() -> String {
  "USD".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
  #[default]
  Open,
  Assigned,
  Completed,
  Cancelled,
  Pending,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
  #[serde(default)]
  pub address: String,
  pub point: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
  pub lat: f64,
  pub lng: f64,
}

/// When the task should happen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DateSpec {
  Fixed {
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
  },
  #[default]
  Flexible,
}

/// Reference to a user with the display fields lists need
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
  #[serde(alias = "_id", default)]
  pub id: String,
  #[serde(default)]
  pub name: String,
  pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
  #[serde(alias = "_id")]
  pub id: String,
  pub task_id: String,
  #[serde(default)]
  pub user: UserRef,
  pub amount: f64,
  #[serde(default = "default_currency")]
  pub currency: String,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub status: OfferStatus,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub demo: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
  #[default]
  Pending,
  Accepted,
  Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
  pub name: String,
  #[serde(default)]
  pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
  #[serde(alias = "_id")]
  pub id: String,
  pub task_id: String,
  #[serde(default)]
  pub user: UserRef,
  pub text: String,
  pub answer: Option<String>,
  pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStatus {
  pub task_id: String,
  #[serde(default)]
  pub completed: bool,
  #[serde(default)]
  pub confirmed_by_poster: bool,
  pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatus {
  pub task_id: String,
  #[serde(default)]
  pub paid: bool,
  pub amount: Option<f64>,
  pub currency: Option<String>,
  pub reference: Option<String>,
}

// ============================================================================
// Inputs
// ============================================================================

/// Server-side list filters. `None` fields are omitted from both the query
/// string and the cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilters {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<TaskStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub search: Option<String>,
}

impl TaskFilters {
  /// Query-string pairs in a stable order.
  pub fn to_params(&self) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(category) = &self.category {
      params.push(("category", category.clone()));
    }
    if let Some(status) = self.status {
      params.push(("status", status.as_str().to_string()));
    }
    if let Some(search) = &self.search {
      params.push(("search", search.clone()));
    }
    params
  }

  /// Client-side equivalent of the server filter, used on derived data.
  pub fn matches(&self, task: &Task) -> bool {
    let category_ok = self
      .category
      .as_ref()
      .is_none_or(|c| task.categories.iter().any(|t| t.eq_ignore_ascii_case(c)));
    let status_ok = self.status.is_none_or(|s| task.status == s);
    let search_ok = self.search.as_ref().is_none_or(|q| {
      let q = q.to_lowercase();
      task.title.to_lowercase().contains(&q) || task.details.to_lowercase().contains(&q)
    });
    category_ok && status_ok && search_ok
  }
}

impl TaskStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      TaskStatus::Open => "open",
      TaskStatus::Assigned => "assigned",
      TaskStatus::Completed => "completed",
      TaskStatus::Cancelled => "cancelled",
      TaskStatus::Pending => "pending",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
  pub title: String,
  pub details: String,
  pub categories: Vec<String>,
  pub budget: Money,
  #[serde(default)]
  pub location: Location,
  #[serde(default)]
  pub date: DateSpec,
}

/// Partial update; absent fields are left alone by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub categories: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub budget: Option<Money>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub location: Option<Location>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub date: Option<DateSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOffer {
  pub amount: f64,
  pub currency: String,
  pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub amount: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<OfferStatus>,
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
  pub email: String,
  pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signup {
  pub name: String,
  pub email: String,
  pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpVerification {
  pub email: String,
  pub otp: String,
}

/// A signed-in session. `demo` sessions were issued locally and are not
/// known to any server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub token: String,
  pub user: UserRef,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub demo: bool,
}
