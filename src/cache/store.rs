//! The query cache and its subscription handles.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

use super::entry::{Entry, EntrySnapshot, FetchStatus};
use super::key::CacheKey;
use super::patch::PatchOp;
use super::tag::Tag;
use crate::error::ApiError;

/// How long an unobserved entry is kept, so a consumer that unsubscribes and
/// immediately subscribes again does not refetch.
pub const DEFAULT_EVICTION_GRACE: Duration = Duration::from_secs(5);

/// A boxed future resolving to the JSON body of a read
pub type FetchFuture = BoxFuture<'static, Result<Value, ApiError>>;

/// A factory creating one fetch future per call
pub type Fetcher = Arc<dyn Fn() -> FetchFuture + Send + Sync>;

/// Tags an entry provides, given its data (`None` before the first success or
/// after a failure)
pub type TagsFn = Arc<dyn Fn(Option<&Value>) -> Vec<Tag> + Send + Sync>;

/// Ops predicting a mutation's effect on one entry, given its key and
/// current data
pub type PatchPlan = Arc<dyn Fn(&CacheKey, &Value) -> Vec<PatchOp> + Send + Sync>;

/// How to (re)fetch an entry and which tags its data provides.
#[derive(Clone)]
pub struct QuerySource {
  pub(super) fetch: Fetcher,
  pub(super) provides: TagsFn,
}

impl QuerySource {
  pub fn new<F, P>(fetch: F, provides: P) -> Self
  where
    F: Fn() -> FetchFuture + Send + Sync + 'static,
    P: Fn(Option<&Value>) -> Vec<Tag> + Send + Sync + 'static,
  {
    Self {
      fetch: Arc::new(fetch),
      provides: Arc::new(provides),
    }
  }
}

/// Identifies the optimistic patches of one in-flight mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationId(pub u64);

impl fmt::Display for MutationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "m{}", self.0)
  }
}

struct FetchJob {
  key: CacheKey,
  seq: u64,
  fetch: Fetcher,
}

#[derive(Default)]
struct CacheState {
  entries: HashMap<CacheKey, Entry>,
  /// Last sequence number handed to a fetch
  seq: u64,
}

impl CacheState {
  /// Mark the entry pending and hand out a new sequence number.
  fn begin_fetch(&mut self, key: &CacheKey) -> Option<FetchJob> {
    let entry = self.entries.get_mut(key)?;
    self.seq += 1;
    entry.started_seq = self.seq;
    entry.status = FetchStatus::Pending;
    entry.publish();
    Some(FetchJob {
      key: key.clone(),
      seq: self.seq,
      fetch: Arc::clone(&entry.source.fetch),
    })
  }
}

struct Inner {
  state: Mutex<CacheState>,
  grace: Duration,
}

/// Keyed store of read results shared by every consumer of one client.
///
/// All bookkeeping runs under a single lock with no await point inside, so
/// each operation is atomic with respect to the others. Network calls run in
/// spawned tasks outside the lock.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Inner>,
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new(DEFAULT_EVICTION_GRACE)
  }
}

impl QueryCache {
  /// Create a cache that keeps unobserved entries for `grace`.
  pub fn new(grace: Duration) -> Self {
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(CacheState::default()),
        grace,
      }),
    }
  }

  pub fn eviction_grace(&self) -> Duration {
    self.inner.grace
  }

  /// Handle that does not keep the cache alive.
  pub(crate) fn downgrade(&self) -> WeakQueryCache {
    WeakQueryCache(Arc::downgrade(&self.inner))
  }

  /// Subscribe to `key`, fetching through `source` if nothing is cached.
  ///
  /// Concurrent subscribers share the entry and its single in-flight fetch.
  /// Dropping the returned handle releases the subscription.
  pub fn subscribe(&self, key: CacheKey, source: QuerySource) -> Subscription {
    let (rx, job) = {
      let mut state = self.lock();
      let floor = state.seq;
      let entry = state
        .entries
        .entry(key.clone())
        .or_insert_with(|| Entry::new(key.clone(), source, floor));
      entry.subscribers += 1;
      entry.generation += 1;
      let rx = entry.watch();
      let needs_fetch = entry.status == FetchStatus::Uninitialized;
      trace!(%key, subscribers = entry.subscribers, "subscribed");

      let job = if needs_fetch {
        state.begin_fetch(&key)
      } else {
        None
      };
      (rx, job)
    };

    if let Some(job) = job {
      self.spawn_fetch(job);
    }

    Subscription {
      cache: self.clone(),
      key,
      rx,
    }
  }

  /// Synchronous snapshot of an entry.
  pub fn read(&self, key: &CacheKey) -> Option<EntrySnapshot> {
    self.lock().entries.get(key).map(Entry::snapshot)
  }

  /// Number of live entries.
  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Invalidate every entry providing one of `tags`.
  ///
  /// Observed entries refetch once, keeping their data visible meanwhile.
  /// Unobserved entries are dropped without any network call.
  pub fn invalidate(&self, tags: &[Tag]) {
    if tags.is_empty() {
      return;
    }
    let jobs = {
      let mut state = self.lock();
      let matched: Vec<(CacheKey, bool)> = state
        .entries
        .values()
        .filter(|entry| entry.provides_any(tags))
        .map(|entry| (entry.key.clone(), entry.subscribers > 0))
        .collect();

      let mut jobs = Vec::new();
      for (key, observed) in matched {
        if observed {
          debug!(%key, "invalidated, refetching");
          jobs.extend(state.begin_fetch(&key));
        } else {
          debug!(%key, "invalidated, evicting");
          state.entries.remove(&key);
        }
      }
      jobs
    };

    for job in jobs {
      self.spawn_fetch(job);
    }
  }

  /// Refetch one entry on request. Returns false if the entry is gone.
  pub fn refetch(&self, key: &CacheKey) -> bool {
    let job = self.lock().begin_fetch(key);
    match job {
      Some(job) => {
        self.spawn_fetch(job);
        true
      }
      None => false,
    }
  }

  /// Refetch every observed entry, e.g. after signing in again.
  pub fn refetch_active(&self) {
    let jobs: Vec<FetchJob> = {
      let mut state = self.lock();
      let keys: Vec<CacheKey> = state
        .entries
        .values()
        .filter(|entry| entry.subscribers > 0)
        .map(|entry| entry.key.clone())
        .collect();
      keys.iter().filter_map(|key| state.begin_fetch(key)).collect()
    };

    for job in jobs {
      self.spawn_fetch(job);
    }
  }

  /// Forget everything fetched under the current session.
  ///
  /// Unobserved entries are dropped. Observed entries lose their data and
  /// patches and report `reason`; results of fetches already in flight are
  /// discarded when they land.
  pub fn reset(&self, reason: ApiError) {
    let mut state = self.lock();
    let floor = state.seq;
    state.entries.retain(|_, entry| entry.subscribers > 0);
    for entry in state.entries.values_mut() {
      entry.reset(reason.clone(), floor);
      entry.publish();
    }
    debug!(observed = state.entries.len(), "cache reset");
  }

  /// Apply optimistic patches for `mutation` to every entry holding data.
  ///
  /// `plan` sees each entry's key and current data and returns the ops to
  /// apply (empty to leave the entry alone). It is run again whenever a
  /// patched entry receives fresh data while the mutation is pending.
  /// Returns the number of entries patched.
  pub(crate) fn apply_optimistic<F>(&self, mutation: MutationId, plan: F) -> usize
  where
    F: Fn(&CacheKey, &Value) -> Vec<PatchOp> + Send + Sync + 'static,
  {
    let plan: PatchPlan = Arc::new(plan);
    let mut state = self.lock();
    let mut patched = 0;
    for entry in state.entries.values_mut() {
      let ops = match &entry.data {
        Some(data) => plan(&entry.key, data),
        None => continue,
      };
      if ops.is_empty() {
        continue;
      }
      if entry.push_layer(mutation, plan.clone(), ops) {
        trace!(key = %entry.key, %mutation, "optimistic patch applied");
        entry.publish();
        patched += 1;
      }
    }
    patched
  }

  /// Make `mutation`'s patches part of the baseline data.
  pub(crate) fn commit(&self, mutation: MutationId) {
    let mut state = self.lock();
    for entry in state.entries.values_mut() {
      entry.commit_layer(mutation);
    }
  }

  /// Undo `mutation`'s patches on every entry that still exists.
  pub(crate) fn rollback(&self, mutation: MutationId) -> usize {
    let mut state = self.lock();
    let mut restored = 0;
    for entry in state.entries.values_mut() {
      if entry.rollback_layer(mutation) {
        trace!(key = %entry.key, %mutation, "optimistic patch rolled back");
        entry.publish();
        restored += 1;
      }
    }
    restored
  }

  #[cfg(test)]
  pub(crate) fn pending_layers(&self, key: &CacheKey) -> usize {
    self
      .lock()
      .entries
      .get(key)
      .map(Entry::pending_layers)
      .unwrap_or(0)
  }

  fn lock(&self) -> MutexGuard<'_, CacheState> {
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn spawn_fetch(&self, job: FetchJob) {
    let cache = self.clone();
    let future = (job.fetch)();
    debug!(key = %job.key, seq = job.seq, "fetch started");
    tokio::spawn(async move {
      let result = future.await;
      cache.complete(&job.key, job.seq, result);
    });
  }

  fn complete(&self, key: &CacheKey, seq: u64, result: Result<Value, ApiError>) {
    let mut state = self.lock();
    let Some(entry) = state.entries.get_mut(key) else {
      debug!(%key, seq, "fetch settled after eviction, discarding");
      return;
    };
    if seq <= entry.accepted_seq {
      debug!(%key, seq, accepted = entry.accepted_seq, "stale fetch result discarded");
      return;
    }
    if let Err(e) = &result {
      debug!(%key, seq, error = %e, "fetch failed");
    } else {
      debug!(%key, seq, "fetch fulfilled");
    }
    entry.settle(seq, result);
    entry.publish();
  }

  fn release(&self, key: &CacheKey) {
    let generation = {
      let mut state = self.lock();
      let Some(entry) = state.entries.get_mut(key) else {
        return;
      };
      entry.subscribers = entry.subscribers.saturating_sub(1);
      trace!(%key, subscribers = entry.subscribers, "released");
      if entry.subscribers > 0 {
        return;
      }
      entry.generation += 1;
      entry.generation
    };
    self.schedule_eviction(key.clone(), generation);
  }

  fn schedule_eviction(&self, key: CacheKey, generation: u64) {
    let grace = self.inner.grace;
    let handle = match tokio::runtime::Handle::try_current() {
      Ok(handle) if !grace.is_zero() => handle,
      _ => {
        self.evict_if_unobserved(&key, generation);
        return;
      }
    };
    let cache = self.downgrade();
    handle.spawn(async move {
      tokio::time::sleep(grace).await;
      if let Some(cache) = cache.upgrade() {
        cache.evict_if_unobserved(&key, generation);
      }
    });
  }

  fn evict_if_unobserved(&self, key: &CacheKey, generation: u64) {
    let mut state = self.lock();
    let unobserved = state
      .entries
      .get(key)
      .map(|entry| entry.subscribers == 0 && entry.generation == generation)
      .unwrap_or(false);
    if unobserved {
      debug!(%key, "evicting unobserved entry");
      state.entries.remove(key);
    }
  }
}

#[derive(Clone)]
pub(crate) struct WeakQueryCache(Weak<Inner>);

impl WeakQueryCache {
  pub(crate) fn upgrade(&self) -> Option<QueryCache> {
    self.0.upgrade().map(|inner| QueryCache { inner })
  }
}

/// A consumer's interest in one cache entry.
///
/// Dropping it decrements the entry's subscriber count; the last drop starts
/// the eviction grace period.
pub struct Subscription {
  cache: QueryCache,
  key: CacheKey,
  rx: watch::Receiver<EntrySnapshot>,
}

impl Subscription {
  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  /// Latest published state of the entry.
  pub fn snapshot(&self) -> EntrySnapshot {
    self.rx.borrow().clone()
  }

  /// Wait for the next change. Returns `None` if the entry was dropped.
  pub async fn changed(&mut self) -> Option<EntrySnapshot> {
    self.rx.changed().await.ok()?;
    Some(self.rx.borrow_and_update().clone())
  }

  /// Wait until no fetch is in flight and return that state.
  pub async fn settled(&mut self) -> EntrySnapshot {
    loop {
      let snapshot = self.rx.borrow_and_update().clone();
      if !snapshot.is_fetching() {
        return snapshot;
      }
      if self.rx.changed().await.is_err() {
        return self.rx.borrow().clone();
      }
    }
  }

  /// Ask the cache to refetch this entry.
  pub fn refetch(&self) -> bool {
    self.cache.refetch(&self.key)
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.cache.release(&self.key);
  }
}

impl fmt::Debug for Subscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("key", &self.key)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::FutureExt;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};
  use tokio::sync::oneshot;

  /// Source counting its fetches and answering with the fetch number.
  fn counting_source(calls: Arc<AtomicU32>, tags: Vec<Tag>) -> QuerySource {
    QuerySource::new(
      move || {
        let calls = calls.clone();
        async move {
          let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
          tokio::time::sleep(Duration::from_millis(5)).await;
          Ok(json!({ "fetch": n }))
        }
        .boxed()
      },
      move |_| tags.clone(),
    )
  }

  fn users_key() -> CacheKey {
    CacheKey::new("users.list", &json!({"page": 1}))
  }

  #[tokio::test]
  async fn test_concurrent_subscribers_share_one_fetch() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));

    let mut subs: Vec<Subscription> = (0..5)
      .map(|_| cache.subscribe(users_key(), counting_source(calls.clone(), vec![])))
      .collect();

    let snapshot = subs[0].settled().await;
    assert_eq!(snapshot.data, Some(json!({"fetch": 1})));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.read(&users_key()).unwrap().subscribers, 5);

    subs.clear();
    assert_eq!(cache.read(&users_key()).unwrap().subscribers, 0);
  }

  #[tokio::test]
  async fn test_invalidate_observed_entry_refetches_once() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let mut sub = cache.subscribe(users_key(), counting_source(calls.clone(), vec![Tag::list("Users")]));
    sub.settled().await;

    cache.invalidate(&[Tag::list("Users")]);
    let refreshed = cache.read(&users_key()).unwrap();
    assert_eq!(refreshed.status, FetchStatus::Pending);
    assert_eq!(refreshed.data, Some(json!({"fetch": 1})));

    let snapshot = sub.settled().await;
    assert_eq!(snapshot.data, Some(json!({"fetch": 2})));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_invalidate_unobserved_entry_evicts_without_fetch() {
    let cache = QueryCache::new(Duration::from_secs(60));
    let calls = Arc::new(AtomicU32::new(0));
    let mut sub = cache.subscribe(users_key(), counting_source(calls.clone(), vec![Tag::list("Users")]));
    sub.settled().await;
    drop(sub);
    assert!(cache.read(&users_key()).is_some());

    cache.invalidate(&[Tag::kind("Users")]);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(cache.read(&users_key()).is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_unrelated_tags_leave_entry_alone() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let mut sub = cache.subscribe(users_key(), counting_source(calls.clone(), vec![Tag::list("Users")]));
    sub.settled().await;

    cache.invalidate(&[Tag::list("Assets"), Tag::with_id("Users", 3)]);

    assert_eq!(cache.read(&users_key()).unwrap().status, FetchStatus::Fulfilled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_resubscribe_within_grace_reuses_entry() {
    let cache = QueryCache::new(Duration::from_millis(30));
    let calls = Arc::new(AtomicU32::new(0));
    let mut sub = cache.subscribe(users_key(), counting_source(calls.clone(), vec![]));
    sub.settled().await;
    drop(sub);

    let sub = cache.subscribe(users_key(), counting_source(calls.clone(), vec![]));
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(sub.snapshot().data, Some(json!({"fetch": 1})));
    assert!(cache.read(&users_key()).is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_unobserved_entry_evicted_after_grace() {
    let cache = QueryCache::new(Duration::from_millis(20));
    let calls = Arc::new(AtomicU32::new(0));
    let mut sub = cache.subscribe(users_key(), counting_source(calls.clone(), vec![]));
    sub.settled().await;
    drop(sub);

    assert!(cache.read(&users_key()).is_some());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(cache.read(&users_key()).is_none());
  }

  #[tokio::test]
  async fn test_error_is_kept_without_refetch() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let failing = QuerySource::new(
      move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(ApiError::Network("offline".to_string())) }.boxed()
      },
      |_| vec![Tag::list("Users")],
    );

    let mut first = cache.subscribe(users_key(), failing.clone());
    let snapshot = first.settled().await;
    assert_eq!(snapshot.status, FetchStatus::Rejected);
    assert!(snapshot.error.as_ref().unwrap().is_network());

    let second = cache.subscribe(users_key(), failing);
    assert_eq!(second.snapshot().status, FetchStatus::Rejected);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(second.refetch());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_last_initiated_fetch_wins() {
    let cache = QueryCache::default();
    let (first_tx, first_rx) = oneshot::channel::<Value>();
    let (second_tx, second_rx) = oneshot::channel::<Value>();
    let gates = Arc::new(Mutex::new(vec![second_rx, first_rx]));
    let source = QuerySource::new(
      move || {
        let gate = gates.lock().unwrap().pop().expect("unexpected fetch");
        async move { gate.await.map_err(|e| ApiError::Network(e.to_string())) }.boxed()
      },
      |_| vec![Tag::list("Users")],
    );

    let _sub = cache.subscribe(users_key(), source);
    cache.invalidate(&[Tag::list("Users")]);

    second_tx.send(json!({"v": 2})).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let snapshot = cache.read(&users_key()).unwrap();
    assert_eq!(snapshot.data, Some(json!({"v": 2})));
    assert_eq!(snapshot.status, FetchStatus::Fulfilled);

    first_tx.send(json!({"v": 1})).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(cache.read(&users_key()).unwrap().data, Some(json!({"v": 2})));
  }

  #[tokio::test]
  async fn test_earlier_fetch_landing_first_keeps_status_pending() {
    let cache = QueryCache::default();
    let (first_tx, first_rx) = oneshot::channel::<Value>();
    let (second_tx, second_rx) = oneshot::channel::<Value>();
    let gates = Arc::new(Mutex::new(vec![second_rx, first_rx]));
    let source = QuerySource::new(
      move || {
        let gate = gates.lock().unwrap().pop().expect("unexpected fetch");
        async move { gate.await.map_err(|e| ApiError::Network(e.to_string())) }.boxed()
      },
      |_| vec![Tag::list("Users")],
    );

    let mut sub = cache.subscribe(users_key(), source);
    cache.invalidate(&[Tag::list("Users")]);

    first_tx.send(json!({"v": 1})).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let snapshot = cache.read(&users_key()).unwrap();
    assert_eq!(snapshot.data, Some(json!({"v": 1})));
    assert_eq!(snapshot.status, FetchStatus::Pending);

    second_tx.send(json!({"v": 2})).unwrap();
    let snapshot = sub.settled().await;
    assert_eq!(snapshot.data, Some(json!({"v": 2})));
  }

  #[tokio::test]
  async fn test_rollback_after_eviction_is_noop() {
    let cache = QueryCache::new(Duration::ZERO);
    let calls = Arc::new(AtomicU32::new(0));
    let mut sub = cache.subscribe(users_key(), counting_source(calls.clone(), vec![]));
    sub.settled().await;

    let mutation = MutationId(1);
    let patched = cache.apply_optimistic(mutation, |_, _| {
      vec![PatchOp::Replace {
        path: "/fetch".to_string(),
        value: json!(99),
      }]
    });
    assert_eq!(patched, 1);
    drop(sub);

    assert!(cache.read(&users_key()).is_none());
    assert_eq!(cache.rollback(mutation), 0);
    assert!(cache.read(&users_key()).is_none());
  }

  #[tokio::test]
  async fn test_stacked_patches_roll_back_out_of_order() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let mut sub = cache.subscribe(users_key(), counting_source(calls.clone(), vec![]));
    sub.settled().await;
    let before = cache.read(&users_key()).unwrap().data;

    let first = MutationId(1);
    let second = MutationId(2);
    cache.apply_optimistic(first, |_, _| {
      vec![PatchOp::Increment {
        path: "/fetch".to_string(),
        delta: 10,
      }]
    });
    cache.apply_optimistic(second, |_, _| {
      vec![PatchOp::Merge {
        path: String::new(),
        fields: json!({"flag": true}).as_object().cloned().unwrap(),
      }]
    });
    assert_eq!(
      cache.read(&users_key()).unwrap().data,
      Some(json!({"fetch": 11, "flag": true}))
    );

    assert_eq!(cache.rollback(first), 1);
    assert_eq!(
      cache.read(&users_key()).unwrap().data,
      Some(json!({"fetch": 1, "flag": true}))
    );
    assert_eq!(cache.pending_layers(&users_key()), 1);

    cache.rollback(second);
    assert_eq!(cache.read(&users_key()).unwrap().data, before);
  }

  #[tokio::test]
  async fn test_pending_patches_survive_refetch() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let mut sub = cache.subscribe(users_key(), counting_source(calls.clone(), vec![Tag::list("Users")]));
    sub.settled().await;

    let mutation = MutationId(7);
    cache.apply_optimistic(mutation, |_, _| {
      vec![PatchOp::Merge {
        path: String::new(),
        fields: json!({"note": "draft"}).as_object().cloned().unwrap(),
      }]
    });

    cache.invalidate(&[Tag::list("Users")]);
    let snapshot = sub.settled().await;
    assert_eq!(snapshot.data, Some(json!({"fetch": 2, "note": "draft"})));

    cache.rollback(mutation);
    assert_eq!(cache.read(&users_key()).unwrap().data, Some(json!({"fetch": 2})));
  }

  #[tokio::test]
  async fn test_reset_discards_data_and_inflight_results() {
    let cache = QueryCache::new(Duration::from_secs(60));
    let calls = Arc::new(AtomicU32::new(0));
    let mut observed = cache.subscribe(users_key(), counting_source(calls.clone(), vec![]));
    observed.settled().await;
    let other = CacheKey::new("assets.list", &json!({}));
    drop(cache.subscribe(other.clone(), counting_source(calls.clone(), vec![])));

    observed.refetch();
    cache.reset(ApiError::Unauthorized {
      message: "signed out".to_string(),
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(cache.read(&other).is_none());
    let snapshot = cache.read(&users_key()).unwrap();
    assert_eq!(snapshot.data, None);
    assert_eq!(snapshot.status, FetchStatus::Rejected);
    assert!(snapshot.error.unwrap().is_unauthorized());

    cache.refetch_active();
    let snapshot = observed.settled().await;
    assert!(snapshot.is_success());
    assert!(snapshot.data.is_some());
  }
}
