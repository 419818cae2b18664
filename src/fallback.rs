//! Fallback resolution chains.
//!
//! A logical read (or a demo-capable write) is an ordered list of
//! [`Strategy`] descriptors run by [`Chain::run`]. Each strategy is a lazy
//! future: nothing is requested until the runner reaches it, so once a
//! strategy is accepted the later ones never touch the network.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::api::ApiError;

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
  /// Dedicated endpoint
  Remote,
  /// Computed client-side from a broader remote resource
  Derived,
  /// Generated locally for demo/offline use
  Synthetic,
  /// Built-in constants
  Defaults,
}

/// Accepted result of a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
  pub value: T,
  pub source: DataSource,
  pub strategy: &'static str,
}

impl<T> Resolved<T> {
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
    Resolved {
      value: f(self.value),
      source: self.source,
      strategy: self.strategy,
    }
  }
}

type Predicate = fn(&ApiError) -> bool;

fn never(_: &ApiError) -> bool {
  false
}

/// One way of producing a value.
pub struct Strategy<'a, T> {
  name: &'static str,
  source: DataSource,
  attempt: BoxFuture<'a, Result<T, ApiError>>,
  accept: Box<dyn Fn(&T) -> bool + Send + 'a>,
  fall_through: Predicate,
  precondition: Option<Predicate>,
}

impl<'a, T: Send + 'a> Strategy<'a, T> {
  /// By default every value is accepted and every error is fatal.
  pub fn new<Fut>(name: &'static str, source: DataSource, attempt: Fut) -> Self
  where
    Fut: Future<Output = Result<T, ApiError>> + Send + 'a,
  {
    Self {
      name,
      source,
      attempt: attempt.boxed(),
      accept: Box::new(|_| true),
      fall_through: never,
      precondition: None,
    }
  }

  /// Values failing `accept` mean "no data here, try the next strategy".
  pub fn accept_if(mut self, accept: impl Fn(&T) -> bool + Send + 'a) -> Self {
    self.accept = Box::new(accept);
    self
  }

  /// Treat empty values as absent, when `enabled`.
  pub fn reject_empty(self, enabled: bool, is_empty: fn(&T) -> bool) -> Self {
    if enabled {
      self.accept_if(move |v| !is_empty(v))
    } else {
      self
    }
  }

  /// Errors matching `eligible` move on to the next strategy; others abort.
  pub fn fall_through_on(mut self, eligible: Predicate) -> Self {
    self.fall_through = eligible;
    self
  }

  /// Only run when the previous strategy failed with an error matching
  /// `required`; otherwise skip without running.
  pub fn only_after(mut self, required: Predicate) -> Self {
    self.precondition = Some(required);
    self
  }
}

/// Strategies for a list of candidate paths, tried in order. `NotFound`
/// is the only signal to move to the next path; any other error stops.
/// A first-candidate network failure is fall-through eligible so a demo
/// strategy placed after the candidates can pick it up, but the remaining
/// candidates are then skipped.
pub fn candidates<'a, T, F, Fut>(paths: &[&'static str], make: F) -> Vec<Strategy<'a, T>>
where
  T: Send + 'a,
  F: Fn(&'static str) -> Fut,
  Fut: Future<Output = Result<T, ApiError>> + Send + 'a,
{
  paths
    .iter()
    .enumerate()
    .map(|(i, &path)| {
      let strategy = Strategy::new(path, DataSource::Remote, make(path))
        .fall_through_on(|e| e.is_not_found() || e.is_network());
      if i == 0 {
        strategy
      } else {
        strategy.only_after(ApiError::is_not_found)
      }
    })
    .collect()
}

enum Outcome<T> {
  Rejected(Resolved<T>),
  Failed(ApiError),
}

/// An ordered list of strategies for one logical operation.
pub struct Chain<'a, T> {
  name: &'static str,
  strategies: Vec<Strategy<'a, T>>,
}

impl<'a, T: Send + 'a> Chain<'a, T> {
  pub fn new(name: &'static str) -> Self {
    Self {
      name,
      strategies: Vec::new(),
    }
  }

  pub fn then(mut self, strategy: Strategy<'a, T>) -> Self {
    self.strategies.push(strategy);
    self
  }

  pub fn then_all(mut self, strategies: impl IntoIterator<Item = Strategy<'a, T>>) -> Self {
    self.strategies.extend(strategies);
    self
  }

  /// Run strategies in order and return the first accepted value.
  ///
  /// When nothing is accepted, the last outcome wins: the last eligible
  /// error, or the last rejected value if no error followed it.
  pub async fn run(self) -> Result<Resolved<T>, ApiError> {
    let chain = self.name;
    let mut last: Option<Outcome<T>> = None;

    for strategy in self.strategies {
      let Strategy {
        name,
        source,
        attempt,
        accept,
        fall_through,
        precondition,
      } = strategy;

      if let Some(required) = precondition {
        let applies = matches!(&last, Some(Outcome::Failed(e)) if required(e));
        if !applies {
          tracing::trace!(chain, strategy = name, "precondition not met, skipping");
          continue;
        }
      }

      match attempt.await {
        Ok(value) if accept(&value) => {
          if source == DataSource::Synthetic {
            tracing::warn!(chain, strategy = name, "substituting synthetic data");
          } else {
            tracing::debug!(chain, strategy = name, ?source, "resolved");
          }
          return Ok(Resolved {
            value,
            source,
            strategy: name,
          });
        }
        Ok(value) => {
          tracing::debug!(chain, strategy = name, "no usable data, trying next");
          last = Some(Outcome::Rejected(Resolved {
            value,
            source,
            strategy: name,
          }));
        }
        Err(err) if fall_through(&err) => {
          tracing::debug!(chain, strategy = name, error = %err, "failed, trying next");
          last = Some(Outcome::Failed(err));
        }
        Err(err) => {
          tracing::debug!(chain, strategy = name, error = %err, "failed, not eligible for fallback");
          return Err(err);
        }
      }
    }

    match last {
      Some(Outcome::Rejected(resolved)) => Ok(resolved),
      Some(Outcome::Failed(err)) => Err(err),
      None => Err(ApiError::unknown(format!("{chain}: no applicable strategy"))),
    }
  }
}
