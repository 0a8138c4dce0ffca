//! The client context tying transport, session, registry and cache together.

use futures::FutureExt;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{self, CacheKey, EntrySnapshot, QueryCache, QuerySource, Subscription, Tag};
use crate::error::ApiError;
use crate::http::{AuthenticatedTransport, Transport};
use crate::mutation::MutationDispatcher;
use crate::registry::auth::{self, AuthResponse};
use crate::registry::{QueryEndpoint, Registry};
use crate::session::{Identity, LogNavigator, Navigator, SessionStore};

/// Build the cache source for one read: a fetcher issuing the endpoint's
/// request through `transport`, and the endpoint's tag declaration.
///
/// Fails without touching the network if `args` cannot form a request.
pub(crate) fn query_source<T: Transport>(
  endpoint: &QueryEndpoint,
  args: &Value,
  transport: Arc<AuthenticatedTransport<T>>,
) -> Result<QuerySource, ApiError> {
  let request = endpoint.request(args)?;
  let tags_endpoint = endpoint.clone();
  let tags_args = args.clone();

  Ok(QuerySource::new(
    move || {
      let transport = transport.clone();
      let request = request.clone();
      async move { transport.execute(request).await }.boxed()
    },
    move |data| tags_endpoint.provided_tags(&tags_args, data),
  ))
}

struct ApiInner<T> {
  registry: Arc<Registry>,
  cache: QueryCache,
  session: SessionStore,
  transport: Arc<AuthenticatedTransport<T>>,
  mutations: MutationDispatcher<T>,
}

/// Entry point for every read and write of the dashboard.
///
/// One `Api` owns exactly one cache, session, registry and transport.
/// Cloning is cheap and shares all of them.
pub struct Api<T> {
  inner: Arc<ApiInner<T>>,
}

impl<T> Clone for Api<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

pub struct ApiBuilder<T> {
  transport: T,
  session: SessionStore,
  registry: Option<Registry>,
  eviction_grace: Duration,
  navigator: Arc<dyn Navigator>,
}

impl<T: Transport> ApiBuilder<T> {
  pub fn new(transport: T, session: SessionStore) -> Self {
    Self {
      transport,
      session,
      registry: None,
      eviction_grace: cache::DEFAULT_EVICTION_GRACE,
      navigator: Arc::new(LogNavigator),
    }
  }

  /// Use `registry` instead of the standard resource table.
  pub fn registry(mut self, registry: Registry) -> Self {
    self.registry = Some(registry);
    self
  }

  pub fn eviction_grace(mut self, grace: Duration) -> Self {
    self.eviction_grace = grace;
    self
  }

  /// Where to send the user when their session expires.
  pub fn navigator(mut self, navigator: impl Navigator + 'static) -> Self {
    self.navigator = Arc::new(navigator);
    self
  }

  pub fn build(self) -> Api<T> {
    let registry = Arc::new(self.registry.unwrap_or_else(Registry::standard));
    let cache = QueryCache::new(self.eviction_grace);
    let transport = Arc::new(AuthenticatedTransport::new(self.transport, self.session.clone()));

    // Fetchers inside the cache hold the session through the transport, so
    // the hook only keeps a weak handle on the cache.
    let weak_cache = cache.downgrade();
    let navigator = self.navigator;
    self.session.on_expire(move || {
      if let Some(cache) = weak_cache.upgrade() {
        cache.reset(ApiError::Unauthorized {
          message: "session expired".to_string(),
        });
      }
      navigator.redirect_to_login();
    });

    let mutations = MutationDispatcher::new(registry.clone(), cache.clone(), transport.clone());
    debug!(
      operations = registry.operations().len(),
      grace_ms = cache.eviction_grace().as_millis() as u64,
      "api client ready"
    );

    Api {
      inner: Arc::new(ApiInner {
        registry,
        cache,
        session: self.session,
        transport,
        mutations,
      }),
    }
  }
}

impl<T: Transport> Api<T> {
  pub fn builder(transport: T, session: SessionStore) -> ApiBuilder<T> {
    ApiBuilder::new(transport, session)
  }

  pub fn session(&self) -> &SessionStore {
    &self.inner.session
  }

  pub fn cache(&self) -> &QueryCache {
    &self.inner.cache
  }

  pub fn registry(&self) -> &Registry {
    &self.inner.registry
  }

  /// Subscribe to the read `operation` with `args`.
  pub fn query(&self, operation: &str, args: Value) -> Result<Subscription, ApiError> {
    let endpoint = self.inner.registry.query(operation)?;
    let args = cache::normalize(&args);
    let source = query_source(endpoint, &args, self.inner.transport.clone())?;
    Ok(self.inner.cache.subscribe(CacheKey::new(operation, &args), source))
  }

  /// Subscribe, wait for the read to settle and return its outcome.
  pub async fn fetch(&self, operation: &str, args: Value) -> Result<Value, ApiError> {
    let mut subscription = self.query(operation, args)?;
    subscription.settled().await.into_result()
  }

  /// Cached state of a read, without subscribing.
  pub fn read(&self, operation: &str, args: &Value) -> Option<EntrySnapshot> {
    self.inner.cache.read(&CacheKey::new(operation, args))
  }

  pub fn refetch(&self, operation: &str, args: &Value) -> bool {
    self.inner.cache.refetch(&CacheKey::new(operation, args))
  }

  pub fn invalidate(&self, tags: &[Tag]) {
    self.inner.cache.invalidate(tags);
  }

  /// Perform the write `operation` with `args`.
  pub async fn mutate(&self, operation: &str, args: Value) -> Result<Value, ApiError> {
    self.inner.mutations.mutate(operation, args).await
  }

  pub async fn login(&self, email: &str, password: &str) -> Result<Identity, ApiError> {
    let body = self
      .inner
      .transport
      .execute(auth::login_request(email, password))
      .await?;
    Ok(self.start_session(AuthResponse::parse(body)?))
  }

  pub async fn register(&self, fields: Map<String, Value>) -> Result<Identity, ApiError> {
    let body = self
      .inner
      .transport
      .execute(auth::register_request(fields))
      .await?;
    Ok(self.start_session(AuthResponse::parse(body)?))
  }

  /// Reload the signed-in user's profile.
  pub async fn refresh_profile(&self) -> Result<Identity, ApiError> {
    let body = self.inner.transport.execute(auth::profile_request()).await?;
    let identity = auth::parse_profile(body)?;
    self.inner.session.update_identity(identity.clone());
    Ok(identity)
  }

  /// Sign out and forget everything read under the session.
  pub fn logout(&self) {
    self.inner.session.clear_session();
    self.inner.cache.reset(ApiError::Unauthorized {
      message: "signed out".to_string(),
    });
    info!("signed out");
  }

  fn start_session(&self, response: AuthResponse) -> Identity {
    let AuthResponse { user, token } = response;
    self.inner.session.set_session(user.clone(), token);
    // Reads kept alive across the sign-in start over with the new credential.
    self.inner.cache.refetch_active();
    user
  }
}
