//! Query keys: structured identity of a cached logical read.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::market::types::TaskFilters;

/// Root namespace shared by every key.
pub const NAMESPACE: &str = "tasks";

/// Operation category of a cached read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryKind {
  List,
  Detail,
  MyTasks,
  MyOffers,
  Offers,
  Questions,
  CompletionStatus,
  PaymentStatus,
  Categories,
}

impl QueryKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      QueryKind::List => "list",
      QueryKind::Detail => "detail",
      QueryKind::MyTasks => "my-tasks",
      QueryKind::MyOffers => "my-offers",
      QueryKind::Offers => "offers",
      QueryKind::Questions => "questions",
      QueryKind::CompletionStatus => "completion-status",
      QueryKind::PaymentStatus => "payment-status",
      QueryKind::Categories => "categories",
    }
  }
}

/// Identity of a cached read: namespace + kind + optional task id + canonical
/// parameters.
///
/// Parameters are stored as canonical JSON (sorted object keys, nulls
/// dropped) so logically equal queries compare and hash equal no matter how
/// the parameter value was built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
  pub kind: QueryKind,
  pub task_id: Option<String>,
  params: String,
}

impl QueryKey {
  pub fn new(kind: QueryKind) -> Self {
    Self {
      kind,
      task_id: None,
      params: String::new(),
    }
  }

  pub fn for_task(kind: QueryKind, task_id: impl Into<String>) -> Self {
    Self {
      kind,
      task_id: Some(task_id.into()),
      params: String::new(),
    }
  }

  /// Attach operation parameters (filters, pagination).
  pub fn with_params<P: Serialize>(mut self, params: &P) -> Self {
    self.params = serde_json::to_value(params)
      .map(|v| canonical_json(&v))
      .unwrap_or_default();
    self
  }

  pub fn list(filters: &TaskFilters) -> Self {
    Self::new(QueryKind::List).with_params(filters)
  }

  pub fn detail(task_id: impl Into<String>) -> Self {
    Self::for_task(QueryKind::Detail, task_id)
  }

  pub fn my_tasks() -> Self {
    Self::new(QueryKind::MyTasks)
  }

  pub fn my_offers() -> Self {
    Self::new(QueryKind::MyOffers)
  }

  pub fn offers(task_id: impl Into<String>) -> Self {
    Self::for_task(QueryKind::Offers, task_id)
  }

  pub fn questions(task_id: impl Into<String>) -> Self {
    Self::for_task(QueryKind::Questions, task_id)
  }

  pub fn completion_status(task_id: impl Into<String>) -> Self {
    Self::for_task(QueryKind::CompletionStatus, task_id)
  }

  pub fn payment_status(task_id: impl Into<String>) -> Self {
    Self::for_task(QueryKind::PaymentStatus, task_id)
  }

  pub fn categories() -> Self {
    Self::new(QueryKind::Categories)
  }

  /// Canonical parameter string ("" when there are none).
  pub fn params(&self) -> &str {
    &self.params
  }

  /// Decode the parameters back, e.g. to replay a list query.
  pub fn decode_params<P: DeserializeOwned + Default>(&self) -> P {
    if self.params.is_empty() {
      return P::default();
    }
    serde_json::from_str(&self.params).unwrap_or_default()
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let input = format!(
      "{}:{}:{}:{}",
      NAMESPACE,
      self.kind.as_str(),
      self.task_id.as_deref().unwrap_or(""),
      self.params
    );

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn description(&self) -> String {
    let mut out = format!("{}/{}", NAMESPACE, self.kind.as_str());
    if let Some(id) = &self.task_id {
      let _ = write!(out, "/{id}");
    }
    if !self.params.is_empty() {
      let _ = write!(out, " {}", self.params);
    }
    out
  }
}

impl std::fmt::Display for QueryKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.description())
  }
}

/// Render a JSON value with sorted object keys and null members removed.
/// An empty object renders as "".
fn canonical_json(value: &Value) -> String {
  match normalize(value) {
    Some(Value::Object(map)) if map.is_empty() => String::new(),
    Some(v) => render(&v),
    None => String::new(),
  }
}

fn normalize(value: &Value) -> Option<Value> {
  match value {
    Value::Null => None,
    Value::Object(map) => Some(Value::Object(
      map
        .iter()
        .filter_map(|(k, v)| normalize(v).map(|v| (k.clone(), v)))
        .collect(),
    )),
    Value::Array(items) => Some(Value::Array(
      items.iter().map(|v| normalize(v).unwrap_or(Value::Null)).collect(),
    )),
    other => Some(other.clone()),
  }
}

/// Serialize with explicitly sorted keys; serde_json's map ordering depends
/// on crate features, so it is not relied upon here.
fn render(value: &Value) -> String {
  match value {
    Value::Object(map) => {
      let sorted: BTreeMap<&String, &Value> = map.iter().collect();
      let body: Vec<String> = sorted
        .into_iter()
        .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), render(v)))
        .collect();
      format!("{{{}}}", body.join(","))
    }
    Value::Array(items) => {
      let body: Vec<String> = items.iter().map(render).collect();
      format!("[{}]", body.join(","))
    }
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::market::types::TaskStatus;
  use serde_json::json;

  #[test]
  fn test_key_order_does_not_matter() {
    let a = QueryKey::new(QueryKind::List).with_params(&json!({"status": "open", "category": "Moving"}));
    let b = QueryKey::new(QueryKind::List).with_params(&json!({"category": "Moving", "status": "open"}));
    assert_eq!(a, b);
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_nulls_and_empty_params_collapse() {
    let a = QueryKey::list(&TaskFilters::default());
    let b = QueryKey::new(QueryKind::List).with_params(&json!({"search": null}));
    let c = QueryKey::new(QueryKind::List);
    assert_eq!(a, b);
    assert_eq!(a, c);
  }

  #[test]
  fn test_filters_produce_distinct_keys() {
    let open = QueryKey::list(&TaskFilters {
      status: Some(TaskStatus::Open),
      ..Default::default()
    });
    let all = QueryKey::list(&TaskFilters::default());
    assert_ne!(open.cache_hash(), all.cache_hash());
  }

  #[test]
  fn test_task_scoped_keys() {
    assert_ne!(QueryKey::detail("1").cache_hash(), QueryKey::offers("1").cache_hash());
    assert_ne!(QueryKey::detail("1").cache_hash(), QueryKey::detail("2").cache_hash());
    assert_eq!(QueryKey::detail("1").description(), "tasks/detail/1");
  }

  #[test]
  fn test_params_decode_back() {
    let filters = TaskFilters {
      category: Some("Cleaning".to_string()),
      search: Some("oven".to_string()),
      ..Default::default()
    };
    let key = QueryKey::list(&filters);
    assert_eq!(key.decode_params::<TaskFilters>(), filters);
    assert_eq!(
      QueryKey::list(&TaskFilters::default()).decode_params::<TaskFilters>(),
      TaskFilters::default()
    );
  }

  #[test]
  fn test_canonical_json_nested() {
    let v = json!({"b": [1, {"z": 1, "a": null}], "a": {"y": 2, "x": 1}});
    assert_eq!(canonical_json(&v), r#"{"a":{"x":1,"y":2},"b":[1,{"z":1}]}"#);
  }
}
