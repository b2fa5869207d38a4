//! Domain types for orders flowing through the sync engine.
//!
//! The engine itself is generic over [`OrderRecord`]; [`Order`] is the concrete
//! record the bundled sources and the CLI work with. Fields the engine does not
//! interpret are kept verbatim in [`Order::extra`] so structural equality sees
//! every change the backend makes.

use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed order identifier.
///
/// Backends hand out either integer or string keys; both are normalised to
/// their string form so the two never compare unequal for the same row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<u64> for OrderId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OrderIdCompat {
    Text(String),
    Int(i64),
    Unsigned(u64),
    Float(f64),
}

impl<'de> Deserialize<'de> for OrderId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match OrderIdCompat::deserialize(deserializer)? {
            OrderIdCompat::Text(s) => Ok(Self(s)),
            OrderIdCompat::Int(n) => Ok(Self(n.to_string())),
            OrderIdCompat::Unsigned(n) => Ok(Self(n.to_string())),
            OrderIdCompat::Float(n) => Ok(Self(n.to_string())),
        }
    }
}

/// Identifier of the user/restaurant owner an order belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Record contract
// ---------------------------------------------------------------------------

/// What the sync engine needs from an order payload.
///
/// `PartialEq` must be structural (value-by-value); it is the only way the
/// engine decides whether an order changed between two fetches.
pub trait OrderRecord: Clone + PartialEq + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync;

    /// Stable identifier, unique within one batch after deduplication.
    fn id(&self) -> Self::Id;

    /// Creation time, used to pick the most recent of several new orders.
    fn created_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

// ---------------------------------------------------------------------------
// Concrete order
// ---------------------------------------------------------------------------

/// An order row as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    #[serde(
        default,
        rename = "user_id",
        alias = "owner_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner: Option<OwnerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Every other column, joined relation, or derived field.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Order {
    /// A bare order carrying only its id.
    pub fn new(id: impl Into<OrderId>) -> Self {
        Self {
            id: id.into(),
            owner: None,
            status: None,
            created_at: None,
            extra: Map::new(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<OwnerId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Whether this order passes an optional owner filter.
    pub fn belongs_to(&self, owner: Option<&OwnerId>) -> bool {
        match owner {
            None => true,
            Some(owner) => self.owner.as_ref() == Some(owner),
        }
    }
}

impl OrderRecord for Order {
    type Id = OrderId;

    fn id(&self) -> OrderId {
        self.id.clone()
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
