mod logging;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use hrdesk::config::Config;
use hrdesk::http::HttpTransport;
use hrdesk::registry::{resources, Resource};
use hrdesk::session::{SessionStore, SqliteStorage};
use hrdesk::Api;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "hrdesk")]
#[command(about = "Command-line client for the HR admin dashboard API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/hrdesk/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Sign in and remember the session
  Login {
    email: String,
    /// Password (default: $HRDESK_PASSWORD)
    #[arg(short, long)]
    password: Option<String>,
  },
  /// Forget the stored session
  Logout,
  /// Show the signed-in user
  Whoami {
    /// Reload the profile from the server
    #[arg(long)]
    refresh: bool,
  },
  /// List records of a resource
  List {
    #[arg(value_parser = parse_resource)]
    resource: Resource,
    #[arg(long)]
    page: Option<u32>,
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    sort: Option<String>,
    #[arg(long)]
    order: Option<String>,
  },
  /// Show one record
  Get {
    #[arg(value_parser = parse_resource)]
    resource: Resource,
    id: String,
  },
  /// Create a record from key=value fields
  Create {
    #[arg(value_parser = parse_resource)]
    resource: Resource,
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_field)]
    fields: Vec<(String, Value)>,
  },
  /// Change fields of a record
  Update {
    #[arg(value_parser = parse_resource)]
    resource: Resource,
    id: String,
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_field)]
    fields: Vec<(String, Value)>,
  },
  /// Delete a record
  Delete {
    #[arg(value_parser = parse_resource)]
    resource: Resource,
    id: String,
  },
  /// Approve or reject a leave/expense request
  SetStatus { id: String, status: String },
}

fn parse_resource(name: &str) -> std::result::Result<Resource, String> {
  Resource::find(name).ok_or_else(|| {
    let known: Vec<&str> = resources::ALL.iter().map(|r| r.name).collect();
    format!("unknown resource '{}', expected one of: {}", name, known.join(", "))
  })
}

/// `key=value`; the value is taken as JSON when it parses, else as a string.
fn parse_field(raw: &str) -> std::result::Result<(String, Value), String> {
  let (key, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
  if key.is_empty() {
    return Err(format!("empty key in '{}'", raw));
  }
  let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
  Ok((key.to_string(), value))
}

/// Numeric ids are sent as numbers so they match cached rows.
fn id_value(id: &str) -> Value {
  id.parse::<u64>().map(Value::from).unwrap_or_else(|_| Value::String(id.to_string()))
}

fn fields_with_id(id: Option<&str>, fields: Vec<(String, Value)>) -> Value {
  let mut map: Map<String, Value> = fields.into_iter().collect();
  if let Some(id) = id {
    map.insert("id".to_string(), id_value(id));
  }
  Value::Object(map)
}

async fn run(api: &Api<HttpTransport>, command: Command) -> Result<Value> {
  let output = match command {
    Command::Login { email, password } => {
      let password = match password {
        Some(p) => p,
        None => std::env::var("HRDESK_PASSWORD")
          .map_err(|_| eyre!("Password not given. Pass --password or set HRDESK_PASSWORD."))?,
      };
      let identity = api.login(&email, &password).await?;
      serde_json::to_value(identity)?
    }
    Command::Logout => {
      api.logout();
      json!({ "signed_in": false })
    }
    Command::Whoami { refresh } => {
      let identity = if refresh {
        Some(api.refresh_profile().await?)
      } else {
        api.session().identity()
      };
      let identity = identity.ok_or_else(|| eyre!("Not signed in. Run `hrdesk login <email>` first."))?;
      serde_json::to_value(identity)?
    }
    Command::List {
      resource,
      page,
      limit,
      search,
      sort,
      order,
    } => {
      let args = json!({
        "page": page,
        "limit": limit,
        "search": search,
        "sort": sort,
        "order": order,
      });
      api.fetch(&resource.operation("list"), args).await?
    }
    Command::Get { resource, id } => {
      api
        .fetch(&resource.operation("get"), json!({ "id": id_value(&id) }))
        .await?
    }
    Command::Create { resource, fields } => {
      api
        .mutate(&resource.operation("create"), fields_with_id(None, fields))
        .await?
    }
    Command::Update {
      resource,
      id,
      fields,
    } => {
      if fields.is_empty() {
        return Err(eyre!("Nothing to update. Pass at least one --set KEY=VALUE."));
      }
      api
        .mutate(&resource.operation("update"), fields_with_id(Some(&id), fields))
        .await?
    }
    Command::Delete { resource, id } => {
      api
        .mutate(&resource.operation("delete"), json!({ "id": id_value(&id) }))
        .await?
    }
    Command::SetStatus { id, status } => {
      api
        .mutate(
          &resources::REQUESTS.operation("set_status"),
          json!({ "id": id_value(&id), "status": status }),
        )
        .await?
    }
  };
  Ok(output)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init()?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  debug!(base_url = %config.api_base_url(), "configuration loaded");

  let storage = match &config.storage.path {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  };
  let session = SessionStore::hydrate(storage);
  let transport = HttpTransport::new(&config)?;
  let api = Api::builder(transport, session)
    .eviction_grace(config.eviction_grace())
    .build();

  let output = run(&api, args.command).await?;
  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_field() {
    assert_eq!(parse_field("age=42").unwrap(), ("age".to_string(), json!(42)));
    assert_eq!(parse_field("active=true").unwrap(), ("active".to_string(), json!(true)));
    assert_eq!(
      parse_field("department=Engineering").unwrap(),
      ("department".to_string(), json!("Engineering"))
    );
    assert_eq!(parse_field("note=a=b").unwrap(), ("note".to_string(), json!("a=b")));
    assert!(parse_field("novalue").is_err());
    assert!(parse_field("=x").is_err());
  }

  #[test]
  fn test_fields_with_id() {
    let args = fields_with_id(Some("5"), vec![("role".to_string(), json!("admin"))]);
    assert_eq!(args, json!({"id": 5, "role": "admin"}));
    assert_eq!(id_value("ab-1"), json!("ab-1"));
  }

  #[test]
  fn test_cli_parses_update() {
    let args = Args::try_parse_from(["hrdesk", "update", "users", "5", "--set", "department=Eng"]).unwrap();
    match args.command {
      Command::Update { resource, id, fields } => {
        assert_eq!(resource, resources::USERS);
        assert_eq!(id, "5");
        assert_eq!(fields, vec![("department".to_string(), json!("Eng"))]);
      }
      other => panic!("unexpected command {:?}", other),
    }
    assert!(Args::try_parse_from(["hrdesk", "list", "payroll"]).is_err());
  }
}
