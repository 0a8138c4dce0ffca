use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::resources::{self, Resource};
use crate::cache::{CacheKey, PatchOp, Tag};
use crate::error::ApiError;
use crate::http::RequestDescriptor;

/// Builds the request for a call from its arguments
pub type RequestFn = Arc<dyn Fn(&Value) -> Result<RequestDescriptor, ApiError> + Send + Sync>;

/// Tags provided by a read, from its arguments and (once fetched) its data
pub type ProvidesFn = Arc<dyn Fn(&Value, Option<&Value>) -> Vec<Tag> + Send + Sync>;

/// Tags invalidated by a successful write, from its arguments
pub type InvalidatesFn = Arc<dyn Fn(&Value) -> Vec<Tag> + Send + Sync>;

/// Ops a write predicts for one cached entry, from the write's arguments and
/// the entry's key and current data
pub type OptimisticFn = Arc<dyn Fn(&Value, &CacheKey, &Value) -> Vec<PatchOp> + Send + Sync>;

fn no_tags(_args: &Value, _data: Option<&Value>) -> Vec<Tag> {
  Vec::new()
}

fn no_invalidation(_args: &Value) -> Vec<Tag> {
  Vec::new()
}

/// A read operation.
#[derive(Clone)]
pub struct QueryEndpoint {
  name: String,
  request: RequestFn,
  provides: ProvidesFn,
}

impl QueryEndpoint {
  pub fn new<R>(name: impl Into<String>, request: R) -> Self
  where
    R: Fn(&Value) -> Result<RequestDescriptor, ApiError> + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      request: Arc::new(request),
      provides: Arc::new(no_tags),
    }
  }

  /// Declare the tags this read provides.
  pub fn provides<P>(mut self, provides: P) -> Self
  where
    P: Fn(&Value, Option<&Value>) -> Vec<Tag> + Send + Sync + 'static,
  {
    self.provides = Arc::new(provides);
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn request(&self, args: &Value) -> Result<RequestDescriptor, ApiError> {
    (self.request)(args)
  }

  pub fn provided_tags(&self, args: &Value, data: Option<&Value>) -> Vec<Tag> {
    (self.provides)(args, data)
  }
}

/// A write operation.
#[derive(Clone)]
pub struct MutationEndpoint {
  name: String,
  request: RequestFn,
  invalidates: InvalidatesFn,
  optimistic: Option<OptimisticFn>,
}

impl MutationEndpoint {
  pub fn new<R>(name: impl Into<String>, request: R) -> Self
  where
    R: Fn(&Value) -> Result<RequestDescriptor, ApiError> + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      request: Arc::new(request),
      invalidates: Arc::new(no_invalidation),
      optimistic: None,
    }
  }

  /// Declare the tags a successful call invalidates. The set must cover
  /// everything the write can change.
  pub fn invalidates<I>(mut self, invalidates: I) -> Self
  where
    I: Fn(&Value) -> Vec<Tag> + Send + Sync + 'static,
  {
    self.invalidates = Arc::new(invalidates);
    self
  }

  /// Declare how cached entries should look before the server confirms.
  pub fn optimistic<O>(mut self, plan: O) -> Self
  where
    O: Fn(&Value, &CacheKey, &Value) -> Vec<PatchOp> + Send + Sync + 'static,
  {
    self.optimistic = Some(Arc::new(plan));
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn request(&self, args: &Value) -> Result<RequestDescriptor, ApiError> {
    (self.request)(args)
  }

  pub fn invalidated_tags(&self, args: &Value) -> Vec<Tag> {
    (self.invalidates)(args)
  }

  pub fn optimistic_plan(&self) -> Option<&OptimisticFn> {
    self.optimistic.as_ref()
  }
}

/// Lookup table from operation name to endpoint.
#[derive(Clone, Default)]
pub struct Registry {
  queries: HashMap<String, QueryEndpoint>,
  mutations: HashMap<String, MutationEndpoint>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Every dashboard resource with its CRUD operations.
  pub fn standard() -> Self {
    resources::ALL
      .iter()
      .fold(Self::new(), |registry, resource| registry.with_resource(resource))
      .with_mutation(resources::request_status_mutation())
  }

  pub fn with_query(mut self, endpoint: QueryEndpoint) -> Self {
    self.queries.insert(endpoint.name.clone(), endpoint);
    self
  }

  pub fn with_mutation(mut self, endpoint: MutationEndpoint) -> Self {
    self.mutations.insert(endpoint.name.clone(), endpoint);
    self
  }

  /// Register the list/get/create/update/delete family of `resource`.
  pub fn with_resource(self, resource: &Resource) -> Self {
    self
      .with_query(resource.list_query())
      .with_query(resource.get_query())
      .with_mutation(resource.create_mutation())
      .with_mutation(resource.update_mutation())
      .with_mutation(resource.delete_mutation())
  }

  pub fn query(&self, name: &str) -> Result<&QueryEndpoint, ApiError> {
    self
      .queries
      .get(name)
      .ok_or_else(|| ApiError::UnknownOperation(name.to_string()))
  }

  pub fn mutation(&self, name: &str) -> Result<&MutationEndpoint, ApiError> {
    self
      .mutations
      .get(name)
      .ok_or_else(|| ApiError::UnknownOperation(name.to_string()))
  }

  /// Operation names, sorted.
  pub fn operations(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self
      .queries
      .keys()
      .chain(self.mutations.keys())
      .map(String::as_str)
      .collect();
    names.sort_unstable();
    names
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_standard_registry_has_every_resource() {
    let registry = Registry::standard();
    for resource in resources::ALL.iter() {
      for verb in ["list", "get"] {
        assert!(registry.query(&resource.operation(verb)).is_ok());
      }
      for verb in ["create", "update", "delete"] {
        assert!(registry.mutation(&resource.operation(verb)).is_ok());
      }
    }
    assert!(registry.mutation("requests.set_status").is_ok());
  }

  #[test]
  fn test_unknown_operation() {
    let registry = Registry::standard();
    assert_eq!(
      registry.query("payroll.list").err(),
      Some(ApiError::UnknownOperation("payroll.list".to_string()))
    );
    // Reads and writes live in separate namespaces.
    assert!(registry.mutation("users.list").is_err());
  }

  #[test]
  fn test_custom_endpoint() {
    let registry = Registry::new().with_query(
      QueryEndpoint::new("stats.dashboard", |_| Ok(RequestDescriptor::get("/stats")))
        .provides(|_, _| vec![Tag::kind("Stats")]),
    );

    let endpoint = registry.query("stats.dashboard").unwrap();
    assert_eq!(endpoint.request(&json!({})).unwrap().path, "/stats");
    assert_eq!(endpoint.provided_tags(&json!({}), None), vec![Tag::kind("Stats")]);
    assert_eq!(registry.operations(), vec!["stats.dashboard"]);
  }
}
