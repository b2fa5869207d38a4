//! Bundled [`OrderSource`] implementations.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use orderwatch_core::{Order, OwnerId};
use orderwatch_sync::SyncError;

use crate::transport::OrderSource;

/// Fetches the order list from a JSON endpoint.
///
/// The endpoint may answer with `{"orders": [...], "error": null}` or with a
/// bare array. A non-null `error` field is a failed fetch even on HTTP 200.
pub struct HttpOrderSource {
    agent: ureq::Agent,
    url: String,
    owner: Option<OwnerId>,
}

impl HttpOrderSource {
    pub fn new(url: impl Into<String>, owner: Option<OwnerId>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            url: url.into(),
            owner,
        }
    }
}

#[async_trait]
impl OrderSource<Order> for HttpOrderSource {
    async fn fetch(&self) -> Result<Vec<Order>, SyncError> {
        let agent = self.agent.clone();
        let url = self.url.clone();
        let owner = self.owner.clone();
        tokio::task::spawn_blocking(move || fetch_http(&agent, &url, owner.as_ref()))
            .await
            .map_err(|err| SyncError::Unexpected(format!("fetch task join error: {err}")))?
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FetchPayload {
    Bare(Vec<Order>),
    Envelope {
        #[serde(default)]
        orders: Option<Vec<Order>>,
        #[serde(default)]
        error: Option<Value>,
    },
}

/// Human-readable text for a backend `error` value of any JSON shape.
fn backend_error_message(error: Value) -> String {
    match error {
        Value::String(message) => message,
        Value::Object(ref fields) => match fields.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => error.to_string(),
        },
        other => other.to_string(),
    }
}

fn fetch_http(
    agent: &ureq::Agent,
    url: &str,
    owner: Option<&OwnerId>,
) -> Result<Vec<Order>, SyncError> {
    let mut request = agent.get(url);
    if let Some(owner) = owner {
        request = request.query("user_id", &owner.0);
    }

    let response = request.call().map_err(|err| match err {
        ureq::Error::Status(code, _) => SyncError::FetchFailed(format!("HTTP {code} from {url}")),
        ureq::Error::Transport(transport) => SyncError::FetchFailed(transport.to_string()),
    })?;

    let payload: FetchPayload = response
        .into_json()
        .map_err(|err| SyncError::Unexpected(format!("undecodable order payload: {err}")))?;

    let orders = match payload {
        FetchPayload::Bare(orders) => orders,
        FetchPayload::Envelope {
            error: Some(error), ..
        } => return Err(SyncError::FetchFailed(backend_error_message(error))),
        FetchPayload::Envelope { orders, .. } => orders.unwrap_or_default(),
    };

    // The server is asked to filter; enforce it anyway.
    Ok(orders
        .into_iter()
        .filter(|order| order.belongs_to(owner))
        .collect())
}

/// Reads one `<id>.json` file per order from a spool directory.
///
/// Writers are expected to write a temp file and rename it into place; a file
/// that does not parse fails the whole fetch so a half-written order never
/// shows up as a removal.
pub struct DirectoryOrderSource {
    dir: PathBuf,
    owner: Option<OwnerId>,
}

impl DirectoryOrderSource {
    pub fn new(dir: impl Into<PathBuf>, owner: Option<OwnerId>) -> Self {
        Self {
            dir: dir.into(),
            owner,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl OrderSource<Order> for DirectoryOrderSource {
    async fn fetch(&self) -> Result<Vec<Order>, SyncError> {
        let dir = self.dir.clone();
        let owner = self.owner.clone();
        tokio::task::spawn_blocking(move || read_spool(&dir, owner.as_ref()))
            .await
            .map_err(|err| SyncError::Unexpected(format!("spool read join error: {err}")))?
    }
}

/// Whether `path` names an order file in a spool directory.
pub(crate) fn is_order_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(true);
    !hidden
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
}

fn read_spool(dir: &Path, owner: Option<&OwnerId>) -> Result<Vec<Order>, SyncError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(SyncError::FetchFailed(format!(
                "order directory missing: {}",
                dir.display()
            )));
        }
        Err(err) => {
            return Err(SyncError::FetchFailed(format!(
                "cannot read {}: {err}",
                dir.display()
            )));
        }
    };

    let mut orders = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SyncError::FetchFailed(err.to_string()))?;
        let path = entry.path();
        if !is_order_file(&path) {
            continue;
        }
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            // Removed between listing and reading.
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(SyncError::FetchFailed(format!(
                    "cannot read {}: {err}",
                    path.display()
                )));
            }
        };
        let order: Order = serde_json::from_str(&contents).map_err(|err| {
            SyncError::FetchFailed(format!("invalid order file {}: {err}", path.display()))
        })?;
        if order.belongs_to(owner) {
            orders.push(order);
        }
    }

    // Newest first; undated orders last, then by id for a stable order.
    orders.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(orders)
}
