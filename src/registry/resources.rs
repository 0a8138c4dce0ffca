//! The HR resources served by the dashboard backend.
//!
//! Every resource follows the same REST layout (`/users`, `/users/{id}`, ...)
//! and tagging convention: list reads provide `Kind:LIST` plus one tag per
//! row, detail reads provide `Kind:<id>`.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};

use super::endpoint::{MutationEndpoint, QueryEndpoint};
use crate::cache::{patch, CacheKey, PatchOp, Tag};
use crate::error::ApiError;
use crate::http::RequestDescriptor;

/// Characters left as-is in a path segment (RFC 3986 unreserved)
const SEGMENT_SET: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'_')
  .remove(b'.')
  .remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resource {
  /// Operation prefix, e.g. `users`
  pub name: &'static str,
  /// Collection path relative to the API base URL
  pub path: &'static str,
  /// Tag kind
  pub tag: &'static str,
}

pub const USERS: Resource = Resource {
  name: "users",
  path: "/users",
  tag: "Users",
};

pub const CONTRACTS: Resource = Resource {
  name: "contracts",
  path: "/contracts",
  tag: "Contracts",
};

pub const EDUCATIONS: Resource = Resource {
  name: "educations",
  path: "/educations",
  tag: "Educations",
};

pub const ASSETS: Resource = Resource {
  name: "assets",
  path: "/assets",
  tag: "Assets",
};

pub const REQUESTS: Resource = Resource {
  name: "requests",
  path: "/requests",
  tag: "Requests",
};

pub const ALL: [Resource; 5] = [USERS, CONTRACTS, EDUCATIONS, ASSETS, REQUESTS];

impl Resource {
  pub fn find(name: &str) -> Option<Resource> {
    ALL.iter().copied().find(|r| r.name == name)
  }

  /// Full operation name for `verb`, e.g. `users.update`.
  pub fn operation(&self, verb: &str) -> String {
    format!("{}.{}", self.name, verb)
  }

  fn item_path(&self, id: &Value) -> String {
    let segment = id_segment(id);
    format!("{}/{}", self.path, utf8_percent_encode(&segment, SEGMENT_SET))
  }

  fn id_tag(&self, id: &Value) -> Tag {
    Tag::with_id(self.tag, id_segment(id))
  }

  /// Whether `key` is a list or detail read of this resource.
  fn is_cached_read(&self, key: &CacheKey) -> bool {
    key.operation() == self.operation("list") || key.operation() == self.operation("get")
  }

  pub fn list_query(&self) -> QueryEndpoint {
    let resource = *self;
    let operation = self.operation("list");
    QueryEndpoint::new(operation.clone(), move |args| {
      let mut request = RequestDescriptor::get(resource.path);
      for (name, value) in query_params(&operation, args)? {
        request = request.param(name, value);
      }
      Ok(request)
    })
    .provides(move |_, data| {
      let mut tags = vec![Tag::list(resource.tag)];
      if let Some(rows) = data.and_then(rows) {
        tags.extend(
          rows
            .iter()
            .filter_map(|row| row.get("id"))
            .map(|id| resource.id_tag(id)),
        );
      }
      tags
    })
  }

  pub fn get_query(&self) -> QueryEndpoint {
    let resource = *self;
    let operation = self.operation("get");
    QueryEndpoint::new(operation.clone(), move |args| {
      let id = require_id(&operation, args)?;
      Ok(RequestDescriptor::get(resource.item_path(id)))
    })
    .provides(move |args, _| match args.get("id") {
      Some(id) if is_id(id) => vec![resource.id_tag(id)],
      _ => Vec::new(),
    })
  }

  pub fn create_mutation(&self) -> MutationEndpoint {
    let resource = *self;
    let operation = self.operation("create");
    MutationEndpoint::new(operation.clone(), move |args| {
      let fields = require_object(&operation, args)?;
      Ok(RequestDescriptor::post(resource.path).body(Value::Object(fields.clone())))
    })
    .invalidates(move |_| vec![Tag::list(resource.tag)])
  }

  pub fn update_mutation(&self) -> MutationEndpoint {
    let resource = *self;
    let operation = self.operation("update");
    MutationEndpoint::new(operation.clone(), move |args| {
      let id = require_id(&operation, args)?;
      let fields = changed_fields(args);
      Ok(RequestDescriptor::patch(resource.item_path(id)).body(Value::Object(fields)))
    })
    .invalidates(move |args| resource.item_tags(args))
    .optimistic(move |args, key, data| {
      if !resource.is_cached_read(key) {
        return Vec::new();
      }
      match args.get("id") {
        Some(id) => patch::merge_record(data, id, &changed_fields(args)),
        None => Vec::new(),
      }
    })
  }

  pub fn delete_mutation(&self) -> MutationEndpoint {
    let resource = *self;
    let operation = self.operation("delete");
    MutationEndpoint::new(operation.clone(), move |args| {
      let id = require_id(&operation, args)?;
      Ok(RequestDescriptor::delete(resource.item_path(id)))
    })
    .invalidates(move |args| resource.item_tags(args))
    .optimistic(move |args, key, data| {
      if key.operation() != resource.operation("list") {
        return Vec::new();
      }
      match args.get("id") {
        Some(id) => patch::remove_record(data, id),
        None => Vec::new(),
      }
    })
  }

  /// Tags touched by a write to a single record.
  fn item_tags(&self, args: &Value) -> Vec<Tag> {
    let mut tags = Vec::with_capacity(2);
    if let Some(id) = args.get("id").filter(|id| is_id(id)) {
      tags.push(self.id_tag(id));
    }
    tags.push(Tag::list(self.tag));
    tags
  }
}

/// Approve or reject a leave/expense request.
pub fn request_status_mutation() -> MutationEndpoint {
  let operation = REQUESTS.operation("set_status");
  MutationEndpoint::new(operation.clone(), move |args| {
    let id = require_id(&operation, args)?;
    let status = args
      .get("status")
      .and_then(Value::as_str)
      .filter(|s| !s.is_empty())
      .ok_or_else(|| invalid(&operation, "missing status"))?;
    Ok(
      RequestDescriptor::patch(format!("{}/status", REQUESTS.item_path(id)))
        .body(serde_json::json!({ "status": status })),
    )
  })
  .invalidates(|args| REQUESTS.item_tags(args))
  .optimistic(|args, key, data| {
    if !REQUESTS.is_cached_read(key) {
      return Vec::new();
    }
    let (Some(id), Some(status)) = (args.get("id"), args.get("status")) else {
      return Vec::<PatchOp>::new();
    };
    let mut fields = Map::new();
    fields.insert("status".to_string(), status.clone());
    patch::merge_record(data, id, &fields)
  })
}

fn invalid(operation: &str, reason: &str) -> ApiError {
  ApiError::InvalidArguments {
    operation: operation.to_string(),
    reason: reason.to_string(),
  }
}

/// `.` and `..` are dot segments to a URL parser and never name a record.
fn is_id(id: &Value) -> bool {
  match id {
    Value::Number(_) => true,
    Value::String(s) => !s.is_empty() && s != "." && s != "..",
    _ => false,
  }
}

fn require_id<'a>(operation: &str, args: &'a Value) -> Result<&'a Value, ApiError> {
  args
    .get("id")
    .filter(|id| is_id(id))
    .ok_or_else(|| invalid(operation, "missing id"))
}

fn require_object<'a>(operation: &str, args: &'a Value) -> Result<&'a Map<String, Value>, ApiError> {
  args
    .as_object()
    .ok_or_else(|| invalid(operation, "expected an object of fields"))
}

/// Path segment for an id; strings are used without JSON quoting.
fn id_segment(id: &Value) -> String {
  match id {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Every argument except the id, which travels in the path.
fn changed_fields(args: &Value) -> Map<String, Value> {
  args
    .as_object()
    .map(|fields| {
      fields
        .iter()
        .filter(|(name, _)| name.as_str() != "id")
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
    })
    .unwrap_or_default()
}

/// Turn list arguments (`page`, `limit`, `search`, `sort`, `order`, filters)
/// into query parameters. Arrays are sent comma separated.
fn query_params(operation: &str, args: &Value) -> Result<Vec<(String, String)>, ApiError> {
  let fields = match args {
    Value::Null => return Ok(Vec::new()),
    Value::Object(fields) => fields,
    _ => return Err(invalid(operation, "expected an object of query parameters")),
  };

  let mut params = Vec::with_capacity(fields.len());
  for (name, value) in fields {
    let rendered = match value {
      Value::Null => continue,
      Value::Array(items) => items
        .iter()
        .map(scalar)
        .collect::<Option<Vec<_>>>()
        .map(|items| items.join(",")),
      other => scalar(other),
    };
    match rendered {
      Some(rendered) => params.push((name.clone(), rendered)),
      None => return Err(invalid(operation, &format!("unsupported value for {}", name))),
    }
  }
  Ok(params)
}

fn scalar(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

fn rows(data: &Value) -> Option<&Vec<Value>> {
  match data {
    Value::Array(rows) => Some(rows),
    other => other.get("data").and_then(Value::as_array),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::Method;
  use serde_json::json;

  #[test]
  fn test_find() {
    assert_eq!(Resource::find("assets"), Some(ASSETS));
    assert_eq!(Resource::find("payroll"), None);
  }

  #[test]
  fn test_list_request_params() {
    let endpoint = USERS.list_query();
    let request = endpoint
      .request(&json!({"page": 2, "limit": 20, "search": "ann", "ids": [1, 2], "sort": null}))
      .unwrap();

    assert_eq!(request.method, Method::Get);
    assert_eq!(request.path, "/users");
    let mut params = request.params.clone();
    params.sort();
    assert_eq!(
      params,
      vec![
        ("ids".to_string(), "1,2".to_string()),
        ("limit".to_string(), "20".to_string()),
        ("page".to_string(), "2".to_string()),
        ("search".to_string(), "ann".to_string()),
      ]
    );

    let err = endpoint.request(&json!({"filter": {"a": 1}})).unwrap_err();
    assert!(matches!(err, ApiError::InvalidArguments { .. }));
  }

  #[test]
  fn test_list_provides_row_tags() {
    let endpoint = USERS.list_query();
    let data = json!({"data": [{"id": 5}, {"id": "7"}], "total": 2});

    assert_eq!(
      endpoint.provided_tags(&json!({}), Some(&data)),
      vec![Tag::list("Users"), Tag::with_id("Users", 5), Tag::with_id("Users", 7)]
    );
    assert_eq!(endpoint.provided_tags(&json!({}), None), vec![Tag::list("Users")]);
  }

  #[test]
  fn test_get_requires_id() {
    let endpoint = CONTRACTS.get_query();
    assert_eq!(endpoint.request(&json!({"id": 3})).unwrap().path, "/contracts/3");
    assert_eq!(endpoint.request(&json!({"id": "c-9"})).unwrap().path, "/contracts/c-9");
    assert_eq!(
      endpoint.request(&json!({})).unwrap_err(),
      ApiError::InvalidArguments {
        operation: "contracts.get".to_string(),
        reason: "missing id".to_string(),
      }
    );
    assert_eq!(
      endpoint.provided_tags(&json!({"id": 3}), None),
      vec![Tag::with_id("Contracts", 3)]
    );
  }

  #[test]
  fn test_id_is_encoded_as_one_segment() {
    let endpoint = USERS.delete_mutation();
    assert_eq!(
      endpoint.request(&json!({"id": "../auth/me"})).unwrap().path,
      "/users/..%2Fauth%2Fme"
    );
    assert_eq!(
      endpoint.request(&json!({"id": "a b?c#d"})).unwrap().path,
      "/users/a%20b%3Fc%23d"
    );
    assert!(endpoint.request(&json!({"id": ".."})).is_err());

    // Tags carry the raw id so they still match cached rows.
    assert_eq!(
      endpoint.invalidated_tags(&json!({"id": "x/y"})),
      vec![Tag::with_id("Users", "x/y"), Tag::list("Users")]
    );
  }

  #[test]
  fn test_update_keeps_explicit_nulls() {
    let endpoint = USERS.update_mutation();
    let request = endpoint.request(&json!({"id": 5, "manager_id": null})).unwrap();
    assert_eq!(request.body, Some(json!({"manager_id": null})));
  }

  #[test]
  fn test_update_request_and_tags() {
    let endpoint = USERS.update_mutation();
    let args = json!({"id": 5, "department": "Eng"});

    let request = endpoint.request(&args).unwrap();
    assert_eq!(request.method, Method::Patch);
    assert_eq!(request.path, "/users/5");
    assert_eq!(request.body, Some(json!({"department": "Eng"})));

    assert_eq!(
      endpoint.invalidated_tags(&args),
      vec![Tag::with_id("Users", 5), Tag::list("Users")]
    );
  }

  #[test]
  fn test_update_plan_targets_own_reads_only() {
    let endpoint = USERS.update_mutation();
    let plan = endpoint.optimistic_plan().unwrap();
    let args = json!({"id": 5, "department": "Eng"});
    let list = json!({"data": [{"id": 5, "department": "Ops"}], "total": 1});

    let ops = plan(&args, &CacheKey::new("users.list", &json!({})), &list);
    assert_eq!(ops.len(), 1);

    let detail = json!({"id": 5, "department": "Ops"});
    let ops = plan(&args, &CacheKey::new("users.get", &json!({"id": 5})), &detail);
    assert_eq!(ops.len(), 1);

    // Same row shape under another resource is left alone.
    let ops = plan(&args, &CacheKey::new("assets.list", &json!({})), &list);
    assert!(ops.is_empty());
  }

  #[test]
  fn test_delete_plan_removes_row() {
    let endpoint = ASSETS.delete_mutation();
    let plan = endpoint.optimistic_plan().unwrap();
    let mut list = json!({"data": [{"id": 1}, {"id": 2}], "total": 2});

    let ops = plan(&json!({"id": 2}), &CacheKey::new("assets.list", &json!({})), &list);
    patch::apply(&ops, &mut list);

    assert_eq!(list, json!({"data": [{"id": 1}], "total": 1}));
    assert_eq!(
      endpoint.request(&json!({"id": 2})).unwrap().method,
      Method::Delete
    );
  }

  #[test]
  fn test_create_invalidates_list_only() {
    let endpoint = EDUCATIONS.create_mutation();
    let args = json!({"degree": "MSc"});

    let request = endpoint.request(&args).unwrap();
    assert_eq!(request.path, "/educations");
    assert_eq!(request.body, Some(args.clone()));
    assert_eq!(endpoint.invalidated_tags(&args), vec![Tag::list("Educations")]);
    assert!(endpoint.optimistic_plan().is_none());
  }

  #[test]
  fn test_request_status() {
    let endpoint = request_status_mutation();
    let args = json!({"id": 11, "status": "approved"});

    let request = endpoint.request(&args).unwrap();
    assert_eq!(request.path, "/requests/11/status");
    assert_eq!(request.body, Some(json!({"status": "approved"})));
    assert!(endpoint.request(&json!({"id": 11})).is_err());
  }
}
