//! Synthetic demo data.
//!
//! A seeded, bounded dataset of tasks and offers used when the server cannot
//! be reached or when running with `offline: true`. Every record it produces
//! carries `demo: true`. Tasks and offers created locally while in demo mode
//! are kept in memory so they show up in later reads of this process.

use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, MutexGuard};

use crate::market::types::{
  Category, DateSpec, GeoPoint, Location, Money, NewOffer, NewTask, Offer, OfferStatus, Session,
  Task, TaskFilters, TaskStatus, UserRef,
};

/// Categories offered when neither the server nor the task collection can
/// provide any.
pub const DEFAULT_CATEGORIES: &[&str] = &[
  "Cleaning",
  "Moving",
  "Handyman",
  "Gardening",
  "Delivery",
  "Assembly",
  "Painting",
  "Tech Help",
  "Pet Care",
  "Errands",
];

const TASK_COUNT: usize = 12;
const MAX_OFFERS_PER_TASK: usize = 4;

const TITLES: &[(&str, &str)] = &[
  ("Deep clean two-bedroom flat", "Cleaning"),
  ("Help moving a sofa upstairs", "Moving"),
  ("Fix a leaking kitchen tap", "Handyman"),
  ("Mow and edge the back lawn", "Gardening"),
  ("Pick up groceries from the market", "Delivery"),
  ("Assemble a wardrobe", "Assembly"),
  ("Paint the hallway", "Painting"),
  ("Set up a home Wi-Fi mesh", "Tech Help"),
  ("Walk a dog twice a day for a week", "Pet Care"),
  ("Return parcels to the post office", "Errands"),
  ("Hang shelves in the study", "Handyman"),
  ("Weed the vegetable beds", "Gardening"),
];

const PEOPLE: &[&str] = &[
  "Ana Silva",
  "Ben Carter",
  "Chloe Martin",
  "Dev Patel",
  "Ema Novak",
  "Farid Haddad",
];

const SUBURBS: &[(&str, f64, f64)] = &[
  ("12 Harbour St, Millers Point", -33.859, 151.204),
  ("4 King St, Newtown", -33.897, 151.179),
  ("88 Beach Rd, Bondi", -33.891, 151.274),
  ("23 Church St, Parramatta", -33.815, 151.003),
];

pub fn default_categories() -> Vec<Category> {
  DEFAULT_CATEGORIES
    .iter()
    .map(|name| Category {
      name: name.to_string(),
      count: 0,
    })
    .collect()
}

/// The user that owns demo sessions.
pub fn demo_user() -> UserRef {
  UserRef {
    id: "demo-user".to_string(),
    name: "Demo User".to_string(),
    avatar: None,
  }
}

#[derive(Default)]
struct Local {
  tasks: Vec<Task>,
  offers: Vec<Offer>,
  next_id: u64,
}

pub struct SyntheticData {
  tasks: Vec<Task>,
  offers: Vec<Offer>,
  local: Mutex<Local>,
}

impl SyntheticData {
  pub fn new(seed: u64) -> Self {
    let mut rng = StdRng::seed_from_u64(seed);
    let people: Vec<UserRef> = PEOPLE
      .iter()
      .enumerate()
      .map(|(i, name)| UserRef {
        id: format!("demo-person-{}", i + 1),
        name: name.to_string(),
        avatar: None,
      })
      .collect();

    let now = Utc::now();
    let mut tasks = Vec::with_capacity(TASK_COUNT);
    let mut offers = Vec::new();

    for (i, (title, category)) in TITLES.iter().take(TASK_COUNT).enumerate() {
      let id = format!("demo-task-{}", i + 1);
      let creator_idx = rng.random_range(0..people.len());
      let creator = people[creator_idx].clone();
      let (address, lat, lng) = SUBURBS[rng.random_range(0..SUBURBS.len())];
      let budget = (rng.random_range(4..=60) * 5) as f64;
      let created_at = now - Duration::hours(rng.random_range(1..=24 * 14));

      let date = if rng.random_bool(0.5) {
        DateSpec::Flexible
      } else {
        let start = now + Duration::days(rng.random_range(1..=21));
        DateSpec::Fixed {
          start,
          end: Some(start + Duration::hours(rng.random_range(1..=8))),
        }
      };

      // Offers come from anyone but the poster.
      let offer_count = rng.random_range(0..=MAX_OFFERS_PER_TASK);
      let mut bidders: Vec<&UserRef> = people.iter().filter(|p| p.id != creator.id).collect();
      let mut task_offers = Vec::with_capacity(offer_count);
      for n in 0..offer_count.min(bidders.len()) {
        let user = bidders.remove(rng.random_range(0..bidders.len()));
        let amount = budget * rng.random_range(80..=120) as f64 / 100.0;
        task_offers.push(Offer {
          id: format!("demo-offer-{}-{}", i + 1, n + 1),
          task_id: id.clone(),
          user: user.clone(),
          amount: amount.round(),
          currency: "USD".to_string(),
          message: format!("Happy to help with this, {} can start soon.", user.name),
          status: OfferStatus::Pending,
          created_at: Some(created_at + Duration::minutes(rng.random_range(5..=600))),
          updated_at: None,
          demo: true,
        });
      }

      // An assigned task has exactly one accepted offer.
      let status = if !task_offers.is_empty() && rng.random_bool(0.25) {
        let accepted = rng.random_range(0..task_offers.len());
        task_offers[accepted].status = OfferStatus::Accepted;
        TaskStatus::Assigned
      } else {
        TaskStatus::Open
      };

      tasks.push(Task {
        id,
        title: title.to_string(),
        details: format!("{title}. Tools and materials can be discussed."),
        categories: vec![category.to_string()],
        budget: Money {
          amount: budget,
          currency: "USD".to_string(),
        },
        status,
        location: Location {
          address: address.to_string(),
          point: Some(GeoPoint { lat, lng }),
        },
        date,
        offer_count: task_offers.len() as u32,
        creator,
        offers: Vec::new(),
        created_at: Some(created_at),
        updated_at: None,
        demo: true,
      });
      offers.extend(task_offers);
    }

    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Self {
      tasks,
      offers,
      local: Mutex::new(Local::default()),
    }
  }

  fn lock_local(&self) -> MutexGuard<'_, Local> {
    self.local.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Locally created tasks first (newest first), then the generated ones.
  fn all_tasks(&self) -> Vec<Task> {
    let local = self.lock_local();
    let mut tasks: Vec<Task> = local.tasks.iter().rev().cloned().collect();
    tasks.extend(self.tasks.iter().cloned());
    for task in &mut tasks {
      task.offer_count = self.count_offers(&local, &task.id);
    }
    tasks
  }

  fn count_offers(&self, local: &Local, task_id: &str) -> u32 {
    self
      .offers
      .iter()
      .chain(local.offers.iter())
      .filter(|o| o.task_id == task_id)
      .count() as u32
  }

  pub fn contains(&self, task_id: &str) -> bool {
    self.tasks.iter().any(|t| t.id == task_id) || self.lock_local().tasks.iter().any(|t| t.id == task_id)
  }

  pub fn tasks(&self, filters: &TaskFilters) -> Vec<Task> {
    self
      .all_tasks()
      .into_iter()
      .filter(|t| filters.matches(t))
      .collect()
  }

  /// One task with its offers embedded.
  pub fn task(&self, task_id: &str) -> Option<Task> {
    let mut task = self.all_tasks().into_iter().find(|t| t.id == task_id)?;
    task.offers = self.offers_for(task_id);
    Some(task)
  }

  pub fn offers_for(&self, task_id: &str) -> Vec<Offer> {
    let local = self.lock_local();
    self
      .offers
      .iter()
      .chain(local.offers.iter())
      .filter(|o| o.task_id == task_id)
      .cloned()
      .collect()
  }

  /// Tasks posted by `user`. Without any local ones, a single generated task
  /// is handed to the user so the view is not empty.
  pub fn my_tasks(&self, user: &UserRef) -> Vec<Task> {
    let mine: Vec<Task> = self
      .all_tasks()
      .into_iter()
      .filter(|t| t.creator.id == user.id)
      .collect();
    if !mine.is_empty() {
      return mine;
    }
    self
      .tasks
      .first()
      .map(|t| Task {
        creator: user.clone(),
        ..t.clone()
      })
      .into_iter()
      .collect()
  }

  /// Tasks carrying an offer by `user`, with that offer embedded. Falls back
  /// to a single generated task bid on by the user.
  pub fn my_offers(&self, user: &UserRef) -> Vec<Task> {
    let local = self.lock_local().offers.clone();
    let mine: Vec<Task> = self
      .all_tasks()
      .into_iter()
      .filter_map(|mut task| {
        let offers: Vec<Offer> = local
          .iter()
          .filter(|o| o.task_id == task.id && o.user.id == user.id)
          .cloned()
          .collect();
        if offers.is_empty() {
          None
        } else {
          task.offers = offers;
          Some(task)
        }
      })
      .collect();
    if !mine.is_empty() {
      return mine;
    }

    let Some(task) = self.tasks.iter().find(|t| t.creator.id != user.id) else {
      return Vec::new();
    };
    let offer = Offer {
      id: format!("{}-demo-offer", task.id),
      task_id: task.id.clone(),
      user: user.clone(),
      amount: task.budget.amount,
      currency: task.budget.currency.clone(),
      message: "I can do this.".to_string(),
      status: OfferStatus::Pending,
      created_at: Some(Utc::now()),
      updated_at: None,
      demo: true,
    };
    vec![Task {
      offers: vec![offer],
      ..task.clone()
    }]
  }

  /// Category counts over the demo tasks, in default-category order.
  pub fn categories(&self) -> Vec<Category> {
    let tasks = self.all_tasks();
    DEFAULT_CATEGORIES
      .iter()
      .map(|name| Category {
        name: name.to_string(),
        count: tasks
          .iter()
          .filter(|t| t.categories.iter().any(|c| c == name))
          .count() as u64,
      })
      .collect()
  }

  /// Create a local task. It lives only as long as this process.
  pub fn create_task(&self, new: &NewTask, creator: &UserRef) -> Task {
    let now = Utc::now();
    let mut local = self.lock_local();
    local.next_id += 1;
    let task = Task {
      id: format!("demo-local-{}", local.next_id),
      title: new.title.clone(),
      details: new.details.clone(),
      categories: new.categories.clone(),
      budget: new.budget.clone(),
      status: TaskStatus::Open,
      location: new.location.clone(),
      date: new.date.clone(),
      offer_count: 0,
      creator: creator.clone(),
      offers: Vec::new(),
      created_at: Some(now),
      updated_at: None,
      demo: true,
    };
    local.tasks.push(task.clone());
    task
  }

  /// Create a local offer on a demo task.
  pub fn create_offer(&self, task_id: &str, new: &NewOffer, user: &UserRef) -> Offer {
    let mut local = self.lock_local();
    local.next_id += 1;
    let offer = Offer {
      id: format!("demo-local-offer-{}", local.next_id),
      task_id: task_id.to_string(),
      user: user.clone(),
      amount: new.amount,
      currency: new.currency.clone(),
      message: new.message.clone(),
      status: OfferStatus::Pending,
      created_at: Some(Utc::now()),
      updated_at: None,
      demo: true,
    };
    local.offers.push(offer.clone());
    offer
  }

  /// A session no server knows about.
  pub fn session(&self, email: &str, name: Option<&str>) -> Session {
    let mut user = demo_user();
    if let Some(name) = name {
      user.name = name.to_string();
    } else if let Some(local_part) = email.split('@').next().filter(|s| !s.is_empty()) {
      user.name = local_part.to_string();
    }
    Session {
      token: format!("demo-{}", hex::encode(email.as_bytes())),
      user,
      demo: true,
    }
  }
}
