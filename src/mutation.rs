//! Write dispatch with optimistic patches.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{MutationId, QueryCache};
use crate::error::ApiError;
use crate::http::{AuthenticatedTransport, Transport};
use crate::registry::Registry;

/// Runs writes declared in the registry against the shared cache.
pub struct MutationDispatcher<T> {
  registry: Arc<Registry>,
  cache: QueryCache,
  transport: Arc<AuthenticatedTransport<T>>,
  next_id: AtomicU64,
}

impl<T: Transport> MutationDispatcher<T> {
  pub fn new(registry: Arc<Registry>, cache: QueryCache, transport: Arc<AuthenticatedTransport<T>>) -> Self {
    Self {
      registry,
      cache,
      transport,
      next_id: AtomicU64::new(0),
    }
  }

  /// Perform the write `operation` with `args`.
  ///
  /// Cached entries are patched with the predicted outcome before the request
  /// is sent. On success the patches become baseline data and the declared
  /// tags are invalidated; on failure the patches are undone and the error is
  /// returned unchanged. Dropping the returned future before it resolves also
  /// undoes the patches.
  pub async fn mutate(&self, operation: &str, args: Value) -> Result<Value, ApiError> {
    let endpoint = self.registry.mutation(operation)?;
    let request = endpoint.request(&args)?;
    let mutation = MutationId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);

    let mut guard = OptimisticGuard::new(self.cache.clone(), mutation);
    if let Some(plan) = endpoint.optimistic_plan() {
      let plan = plan.clone();
      let plan_args = args.clone();
      let patched = self
        .cache
        .apply_optimistic(mutation, move |key, data| plan(&plan_args, key, data));
      if patched > 0 {
        debug!(operation, %mutation, patched, "optimistic update applied");
        guard.arm();
      }
    }

    match self.transport.execute(request).await {
      Ok(body) => {
        guard.commit();
        let tags = endpoint.invalidated_tags(&args);
        info!(operation, %mutation, invalidated = tags.len(), "mutation succeeded");
        self.cache.invalidate(&tags);
        Ok(body)
      }
      Err(err) => {
        let restored = guard.rollback();
        warn!(operation, %mutation, restored, error = %err, "mutation failed");
        Err(err)
      }
    }
  }
}

/// Rolls back a mutation's patches unless it is explicitly settled.
struct OptimisticGuard {
  cache: QueryCache,
  mutation: MutationId,
  armed: bool,
}

impl OptimisticGuard {
  fn new(cache: QueryCache, mutation: MutationId) -> Self {
    Self {
      cache,
      mutation,
      armed: false,
    }
  }

  fn arm(&mut self) {
    self.armed = true;
  }

  fn commit(mut self) {
    if self.armed {
      self.cache.commit(self.mutation);
      self.armed = false;
    }
  }

  fn rollback(mut self) -> usize {
    if !self.armed {
      return 0;
    }
    self.armed = false;
    self.cache.rollback(self.mutation)
  }
}

impl Drop for OptimisticGuard {
  fn drop(&mut self) {
    if self.armed {
      let restored = self.cache.rollback(self.mutation);
      debug!(mutation = %self.mutation, restored, "mutation abandoned, patches rolled back");
    }
  }
}
