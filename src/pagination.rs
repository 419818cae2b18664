//! Pagination aggregator: pulls every page of a collection into one list.

use serde::de::DeserializeOwned;
use url::form_urlencoded;

use crate::api::envelope::decode;
use crate::api::{ApiError, ListEnvelope, RemoteClient};

/// Upper bound on pages requested for one collection, whatever the server
/// claims.
pub const MAX_PAGES: u32 = 200;

/// Result of walking every page of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregated<T> {
  /// Items in page order
  pub items: Vec<T>,
  /// Server-reported total; may exceed `items.len()` when pages were skipped
  pub total: u64,
  pub pages: u32,
  /// Pages that failed and were left out
  pub skipped: Vec<u32>,
}

impl<T> Aggregated<T> {
  pub fn is_complete(&self) -> bool {
    self.skipped.is_empty()
  }

  /// Collapse into one list envelope. `count` is what was actually fetched.
  pub fn into_envelope(self) -> ListEnvelope<T> {
    ListEnvelope {
      success: true,
      count: self.items.len(),
      total: self.total,
      pages: self.pages,
      current_page: self.pages,
      data: self.items,
    }
  }
}

/// Build `path?page=N&limit=M&...`.
pub fn page_path(path: &str, params: &[(&str, String)], page: u32, limit: u32) -> String {
  let mut query = form_urlencoded::Serializer::new(String::new());
  query
    .append_pair("page", &page.to_string())
    .append_pair("limit", &limit.to_string());
  for (name, value) in params {
    query.append_pair(name, value);
  }
  let sep = if path.contains('?') { '&' } else { '?' };
  format!("{}{}{}", path, sep, query.finish())
}

/// Fetch page 1, then pages `2..=pages` one after another.
///
/// Only a page-1 failure is returned as an error, unchanged. Later pages that
/// fail are logged and skipped so that what was fetched is still returned.
pub async fn fetch_all_pages<T: DeserializeOwned>(
  client: &dyn RemoteClient,
  path: &str,
  params: &[(&str, String)],
  page_size: u32,
) -> Result<Aggregated<T>, ApiError> {
  let page_size = page_size.max(1);

  let first: ListEnvelope<T> = decode(client.get(&page_path(path, params, 1, page_size)).await?.data)?;
  let pages = first.pages.clamp(1, MAX_PAGES);
  if first.pages > MAX_PAGES {
    tracing::warn!(path, reported = first.pages, "page count capped at {}", MAX_PAGES);
  }

  let total = first.total;
  let mut items = first.data;
  let mut skipped = Vec::new();

  for page in 2..=pages {
    let result = match client.get(&page_path(path, params, page, page_size)).await {
      Ok(resp) => decode::<ListEnvelope<T>>(resp.data),
      Err(e) => Err(e),
    };

    match result {
      Ok(envelope) => {
        if envelope.current_page != page {
          tracing::debug!(path, page, reported = envelope.current_page, "page number mismatch");
        }
        items.extend(envelope.data);
      }
      Err(err) => {
        tracing::warn!(path, page, error = %err, "skipping failed page");
        skipped.push(page);
      }
    }
  }

  tracing::debug!(path, fetched = items.len(), total, pages, skipped = skipped.len(), "aggregated pages");

  Ok(Aggregated {
    items,
    total,
    pages,
    skipped,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::fake::FakeRemote;
  use crate::api::Method;
  use pretty_assertions::assert_eq;
  use serde_json::json;

  /// Serve `total` numbered items in pages of `size` under /items.
  fn serve(remote: &FakeRemote, total: u64, size: u32) -> u32 {
    let pages = (total.div_ceil(size as u64)).max(1) as u32;
    for page in 1..=pages {
      let start = (page as u64 - 1) * size as u64;
      let end = (start + size as u64).min(total);
      let data: Vec<u64> = (start..end).collect();
      remote.ok(
        Method::Get,
        &page_path("/items", &[], page, size),
        json!({
          "success": true,
          "count": data.len(),
          "total": total,
          "pages": pages,
          "currentPage": page,
          "data": data,
        }),
      );
    }
    pages
  }

  #[tokio::test]
  async fn test_collects_every_page_in_order() {
    for (pages, size) in [(1u64, 10u32), (2, 10), (5, 4)] {
      let remote = FakeRemote::new();
      let total = pages * size as u64;
      serve(&remote, total, size);

      let result: Aggregated<u64> = fetch_all_pages(&remote, "/items", &[], size).await.unwrap();
      assert_eq!(result.items, (0..total).collect::<Vec<_>>());
      assert_eq!(result.pages as u64, pages);
      assert!(result.is_complete());
      assert_eq!(remote.calls().len() as u64, pages);
    }
  }

  #[tokio::test]
  async fn test_partial_last_page() {
    let remote = FakeRemote::new();
    serve(&remote, 23, 10);

    let result: Aggregated<u64> = fetch_all_pages(&remote, "/items", &[], 10).await.unwrap();
    assert_eq!(result.items.len(), 23);
    assert_eq!(result.into_envelope().count, 23);
  }

  #[tokio::test]
  async fn test_failed_later_page_is_skipped() {
    for failing in 2..=5u32 {
      let remote = FakeRemote::new();
      serve(&remote, 20, 4);
      remote.fail(
        Method::Get,
        &page_path("/items", &[], failing, 4),
        ApiError::unknown("boom"),
      );

      let result: Aggregated<u64> = fetch_all_pages(&remote, "/items", &[], 4).await.unwrap();
      let expected: Vec<u64> = (0..20)
        .filter(|i| (i / 4 + 1) as u32 != failing)
        .collect();
      assert_eq!(result.items, expected);
      assert_eq!(result.skipped, vec![failing]);
      assert_eq!(result.total, 20);

      let envelope = result.into_envelope();
      assert_eq!(envelope.count, 16);
      assert_eq!(envelope.total, 20);
    }
  }

  #[tokio::test]
  async fn test_first_page_failure_is_fatal() {
    let remote = FakeRemote::new();
    serve(&remote, 20, 4);
    remote.fail(
      Method::Get,
      &page_path("/items", &[], 1, 4),
      ApiError::NetworkUnreachable("refused".into()),
    );

    let err = fetch_all_pages::<u64>(&remote, "/items", &[], 4).await.unwrap_err();
    assert_eq!(err, ApiError::NetworkUnreachable("refused".into()));
    assert_eq!(remote.calls().len(), 1);
  }

  #[test]
  fn test_page_path_encodes_params() {
    assert_eq!(
      page_path("/tasks", &[("search", "lawn & garden".to_string())], 2, 50),
      "/tasks?page=2&limit=50&search=lawn+%26+garden"
    );
    assert_eq!(page_path("/tasks?mine=1", &[], 1, 10), "/tasks?mine=1&page=1&limit=10");
  }
}
