//! Static invalidation table: which cached reads each write touches.

use super::key::{QueryKey, QueryKind};

/// Kinds of writes the marketplace performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
  CreateTask,
  UpdateTask,
  DeleteTask,
  CreateOffer,
  AcceptOffer,
  UpdateOffer,
  CompleteTask,
  CancelTask,
  AcceptTask,
  UpdateStatus,
  CompletePayment,
  PostQuestion,
  AnswerQuestion,
}

/// Which keys of a kind an effect reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
  /// Every key of the kind, whatever its parameters
  All,
  /// Only the key for the mutated task
  Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
  /// Mark stale; refetched on next read
  Invalidate,
  /// Mark stale and refetch right away
  Refetch,
  /// Drop the entry
  Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effect {
  pub kind: QueryKind,
  pub scope: Scope,
  pub action: Action,
}

const fn effect(kind: QueryKind, scope: Scope, action: Action) -> Effect {
  Effect {
    kind,
    scope,
    action,
  }
}

pub struct Rule {
  pub mutations: &'static [MutationKind],
  pub effects: &'static [Effect],
}

use Action::{Invalidate, Refetch, Remove};
use MutationKind::*;
use QueryKind as K;
use Scope::{All, Task};

pub const INVALIDATION_TABLE: &[Rule] = &[
  Rule {
    mutations: &[CreateTask],
    effects: &[
      effect(K::List, All, Refetch),
      effect(K::MyTasks, All, Refetch),
      effect(K::MyOffers, All, Invalidate),
    ],
  },
  Rule {
    mutations: &[UpdateTask],
    effects: &[
      effect(K::Detail, Task, Refetch),
      effect(K::List, All, Invalidate),
      effect(K::MyTasks, All, Invalidate),
    ],
  },
  Rule {
    mutations: &[DeleteTask],
    effects: &[
      effect(K::Detail, Task, Remove),
      effect(K::List, All, Refetch),
      effect(K::MyTasks, All, Refetch),
    ],
  },
  Rule {
    mutations: &[CreateOffer],
    effects: &[
      effect(K::Offers, Task, Refetch),
      effect(K::MyOffers, All, Invalidate),
    ],
  },
  Rule {
    mutations: &[AcceptOffer, UpdateOffer],
    effects: &[
      effect(K::Detail, Task, Refetch),
      effect(K::Offers, Task, Refetch),
      effect(K::MyTasks, All, Invalidate),
      effect(K::MyOffers, All, Invalidate),
    ],
  },
  Rule {
    mutations: &[CompleteTask, CancelTask, AcceptTask, UpdateStatus],
    effects: &[
      effect(K::Detail, Task, Refetch),
      effect(K::MyTasks, All, Invalidate),
      effect(K::MyOffers, All, Invalidate),
    ],
  },
  Rule {
    mutations: &[CompletePayment],
    effects: &[
      effect(K::Detail, Task, Refetch),
      effect(K::PaymentStatus, Task, Refetch),
      effect(K::MyTasks, All, Invalidate),
    ],
  },
  Rule {
    mutations: &[PostQuestion, AnswerQuestion],
    effects: &[effect(K::Questions, Task, Refetch)],
  },
];

/// Effects of a mutation kind, as listed in [`INVALIDATION_TABLE`].
pub fn effects_for(kind: MutationKind) -> &'static [Effect] {
  INVALIDATION_TABLE
    .iter()
    .find(|rule| rule.mutations.contains(&kind))
    .map(|rule| rule.effects)
    .unwrap_or(&[])
}

/// A write that has succeeded and must now be reflected in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
  pub kind: MutationKind,
  pub task_id: Option<String>,
}

impl Invalidation {
  pub fn new(kind: MutationKind) -> Self {
    Self {
      kind,
      task_id: None,
    }
  }

  pub fn for_task(kind: MutationKind, task_id: impl Into<String>) -> Self {
    Self {
      kind,
      task_id: Some(task_id.into()),
    }
  }

  /// Concrete targets with their actions.
  pub fn targets(&self) -> Vec<(Target, Action)> {
    effects_for(self.kind)
      .iter()
      .map(|e| (Target::from_effect(e, self.task_id.as_deref()), e.action))
      .collect()
  }
}

/// A set of cache keys: one kind, optionally narrowed to one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
  pub kind: QueryKind,
  pub task_id: Option<String>,
}

impl Target {
  pub fn kind(kind: QueryKind) -> Self {
    Self {
      kind,
      task_id: None,
    }
  }

  pub fn task(kind: QueryKind, task_id: impl Into<String>) -> Self {
    Self {
      kind,
      task_id: Some(task_id.into()),
    }
  }

  /// A task-scoped effect without a task id widens to the whole kind.
  fn from_effect(effect: &Effect, task_id: Option<&str>) -> Self {
    match (effect.scope, task_id) {
      (Scope::Task, Some(id)) => Self::task(effect.kind, id),
      _ => Self::kind(effect.kind),
    }
  }

  pub fn matches(&self, key: &QueryKey) -> bool {
    key.kind == self.kind
      && self
        .task_id
        .as_deref()
        .is_none_or(|id| key.task_id.as_deref() == Some(id))
  }
}
