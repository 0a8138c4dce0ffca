//! Cache entries and the snapshots handed to readers.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use tokio::sync::watch;

use super::key::CacheKey;
use super::patch::{self, PatchOp};
use super::store::{MutationId, PatchPlan, QuerySource};
use super::tag::Tag;
use crate::error::ApiError;

/// Fetch status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
  /// No fetch has been started
  Uninitialized,
  /// A fetch is in flight; previous data, if any, stays readable
  Pending,
  /// The latest fetch succeeded
  Fulfilled,
  /// The latest fetch failed
  Rejected,
}

/// Point-in-time view of a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot {
  pub key: CacheKey,
  /// Fetched data with any pending optimistic patches applied
  pub data: Option<Value>,
  pub error: Option<ApiError>,
  pub status: FetchStatus,
  pub tags: Vec<Tag>,
  pub subscribers: usize,
  /// When the data was last confirmed by the server
  pub fetched_at: Option<DateTime<Utc>>,
}

impl EntrySnapshot {
  pub fn is_loading(&self) -> bool {
    self.status == FetchStatus::Pending && self.data.is_none()
  }

  pub fn is_fetching(&self) -> bool {
    self.status == FetchStatus::Pending
  }

  pub fn is_success(&self) -> bool {
    self.status == FetchStatus::Fulfilled
  }

  pub fn is_error(&self) -> bool {
    self.status == FetchStatus::Rejected
  }

  /// Data of a settled entry, or its error.
  pub fn into_result(self) -> Result<Value, ApiError> {
    match (self.status, self.data, self.error) {
      (FetchStatus::Rejected, _, Some(err)) => Err(err),
      (_, Some(data), _) => Ok(data),
      (_, None, Some(err)) => Err(err),
      (_, None, None) => Ok(Value::Null),
    }
  }
}

/// Optimistic edits made by one mutation to one entry.
struct PatchLayer {
  mutation: MutationId,
  /// Re-run against fresh data, so records are found again by id
  plan: PatchPlan,
  forward: Vec<PatchOp>,
  inverse: Vec<PatchOp>,
}

pub(super) struct Entry {
  pub(super) key: CacheKey,
  pub(super) source: QuerySource,
  pub(super) data: Option<Value>,
  pub(super) error: Option<ApiError>,
  pub(super) status: FetchStatus,
  pub(super) tags: BTreeSet<Tag>,
  pub(super) subscribers: usize,
  pub(super) fetched_at: Option<DateTime<Utc>>,
  /// Sequence number of the most recently started fetch
  pub(super) started_seq: u64,
  /// Sequence number of the last completion written to this entry
  pub(super) accepted_seq: u64,
  /// Bumped on every subscribe and release; a scheduled eviction only runs if
  /// the generation it captured is still current.
  pub(super) generation: u64,
  layers: Vec<PatchLayer>,
  tx: watch::Sender<EntrySnapshot>,
}

impl Entry {
  /// `floor_seq` is the last sequence number handed out before this entry
  /// existed; completions at or below it belong to an earlier incarnation.
  pub(super) fn new(key: CacheKey, source: QuerySource, floor_seq: u64) -> Self {
    let tags: BTreeSet<Tag> = (source.provides)(None).into_iter().collect();
    let (tx, _rx) = watch::channel(EntrySnapshot {
      key: key.clone(),
      data: None,
      error: None,
      status: FetchStatus::Uninitialized,
      tags: tags.iter().cloned().collect(),
      subscribers: 0,
      fetched_at: None,
    });

    Self {
      key,
      source,
      data: None,
      error: None,
      status: FetchStatus::Uninitialized,
      tags,
      subscribers: 0,
      fetched_at: None,
      started_seq: floor_seq,
      accepted_seq: floor_seq,
      generation: 0,
      layers: Vec::new(),
      tx,
    }
  }

  pub(super) fn snapshot(&self) -> EntrySnapshot {
    EntrySnapshot {
      key: self.key.clone(),
      data: self.data.clone(),
      error: self.error.clone(),
      status: self.status,
      tags: self.tags.iter().cloned().collect(),
      subscribers: self.subscribers,
      fetched_at: self.fetched_at,
    }
  }

  pub(super) fn watch(&self) -> watch::Receiver<EntrySnapshot> {
    self.tx.subscribe()
  }

  /// Push the current state to subscribers.
  pub(super) fn publish(&self) {
    self.tx.send_replace(self.snapshot());
  }

  pub(super) fn provides_any(&self, invalidated: &[Tag]) -> bool {
    invalidated
      .iter()
      .any(|tag| self.tags.iter().any(|provided| tag.matches(provided)))
  }

  /// Store a fetch result. Pending optimistic layers are replayed on top of
  /// fresh data so they stay visible until their mutations settle.
  pub(super) fn settle(&mut self, seq: u64, result: Result<Value, ApiError>) {
    self.accepted_seq = seq;
    let latest = seq >= self.started_seq;

    match result {
      Ok(value) => {
        self.tags = (self.source.provides)(Some(&value)).into_iter().collect();
        self.data = Some(value);
        self.error = None;
        self.fetched_at = Some(Utc::now());
        self.replay_layers();
        if latest {
          self.status = FetchStatus::Fulfilled;
        }
      }
      Err(err) => {
        self.tags.extend((self.source.provides)(None));
        self.error = Some(err);
        if latest {
          self.status = FetchStatus::Rejected;
        }
      }
    }
  }

  /// Apply a mutation's ops and remember how to undo them.
  ///
  /// `plan` produced `forward` from the current data and is kept to rebuild
  /// the ops whenever fresh data replaces it.
  pub(super) fn push_layer(&mut self, mutation: MutationId, plan: PatchPlan, forward: Vec<PatchOp>) -> bool {
    let Some(data) = self.data.as_mut() else {
      return false;
    };
    let inverse = patch::apply(&forward, data);
    self.layers.push(PatchLayer {
      mutation,
      plan,
      forward,
      inverse,
    });
    true
  }

  /// Forget a mutation's layer; its edits become part of the data.
  pub(super) fn commit_layer(&mut self, mutation: MutationId) {
    self.layers.retain(|layer| layer.mutation != mutation);
  }

  /// Undo a mutation's layer.
  ///
  /// Layers pushed after it are unwound first and then re-applied, so undo
  /// always happens in strict reverse order of application.
  pub(super) fn rollback_layer(&mut self, mutation: MutationId) -> bool {
    let Some(position) = self.layers.iter().position(|l| l.mutation == mutation) else {
      return false;
    };
    let Some(data) = self.data.as_mut() else {
      self.layers.clear();
      return false;
    };

    let later = self.layers.split_off(position + 1);
    for layer in later.iter().rev() {
      patch::apply(&layer.inverse, data);
    }
    if let Some(layer) = self.layers.pop() {
      patch::apply(&layer.inverse, data);
    }
    for mut layer in later {
      layer.inverse = patch::apply(&layer.forward, data);
      self.layers.push(layer);
    }
    true
  }

  #[cfg(test)]
  pub(super) fn pending_layers(&self) -> usize {
    self.layers.len()
  }

  /// Drop data, patches and in-flight results after the session ended.
  pub(super) fn reset(&mut self, reason: ApiError, floor_seq: u64) {
    self.data = None;
    self.fetched_at = None;
    self.layers.clear();
    self.error = Some(reason);
    self.status = FetchStatus::Rejected;
    self.started_seq = floor_seq;
    self.accepted_seq = floor_seq;
  }

  fn replay_layers(&mut self) {
    let Some(data) = self.data.as_mut() else {
      return;
    };
    for layer in &mut self.layers {
      layer.forward = (layer.plan)(&self.key, data);
      layer.inverse = patch::apply(&layer.forward, data);
    }
  }
}
