//! Identity of storage handles: mode and kind.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The role a storage handle plays in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// A long-lived broker of connections.
    Pool,
    /// One exclusive session borrowed from a pool.
    Conn,
    /// An open unit of work.
    Txn,
}

impl StorageMode {
    /// Returns the canonical lowercase name of this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Pool => "pool",
            StorageMode::Conn => "conn",
            StorageMode::Txn => "txn",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pool" => Ok(StorageMode::Pool),
            "conn" => Ok(StorageMode::Conn),
            "txn" => Ok(StorageMode::Txn),
            other => Err(format!("unknown storage mode: {}", other)),
        }
    }
}

/// The backend family behind a storage handle.
///
/// This is an open set: the associated constants name the well-known
/// families, and any other string is a valid caller-defined kind. Compare
/// kinds by value.
///
/// ```
/// use storage_api::core::StorageKind;
///
/// let custom = StorageKind::new("time-series");
/// assert_ne!(custom, StorageKind::RELATIONAL);
/// assert_eq!(StorageKind::new("graph"), StorageKind::GRAPH);
/// assert!(!custom.is_well_known());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKind(Cow<'static, str>);

impl StorageKind {
    /// Placeholder for an unknown backend family.
    pub const UNKNOWN: StorageKind = StorageKind::from_static("unknown");
    /// A relational database implementing SQL APIs.
    pub const RELATIONAL: StorageKind = StorageKind::from_static("relational");
    /// A document store.
    pub const DOCUMENT: StorageKind = StorageKind::from_static("document");
    /// A graph database.
    pub const GRAPH: StorageKind = StorageKind::from_static("graph");
    /// A key-value store.
    pub const KEY_VALUE: StorageKind = StorageKind::from_static("key-value");
    /// A wide-column store.
    pub const WIDE_COLUMN: StorageKind = StorageKind::from_static("wide-column");

    /// Creates a kind from a static string without allocating.
    pub const fn from_static(name: &'static str) -> Self {
        StorageKind(Cow::Borrowed(name))
    }

    /// Creates a kind from any string.
    pub fn new(name: impl Into<String>) -> Self {
        StorageKind(Cow::Owned(name.into()))
    }

    /// Returns the kind as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this is one of the well-known families.
    pub fn is_well_known(&self) -> bool {
        WELL_KNOWN.iter().any(|known| known == self)
    }

    /// Returns the well-known families.
    pub fn well_known() -> &'static [StorageKind] {
        &WELL_KNOWN
    }
}

static WELL_KNOWN: [StorageKind; 6] = [
    StorageKind::UNKNOWN,
    StorageKind::RELATIONAL,
    StorageKind::DOCUMENT,
    StorageKind::GRAPH,
    StorageKind::KEY_VALUE,
    StorageKind::WIDE_COLUMN,
];

impl Default for StorageKind {
    fn default() -> Self {
        StorageKind::UNKNOWN
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for StorageKind {
    fn from(name: &str) -> Self {
        StorageKind::new(name)
    }
}

impl From<String> for StorageKind {
    fn from(name: String) -> Self {
        StorageKind::new(name)
    }
}

impl PartialEq<str> for StorageKind {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for StorageKind {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Read-only identity shared by every pool, connection and transaction.
///
/// This trait is object safe so generic tooling (logging, metrics, routing)
/// can inspect any handle through `&dyn StorageApi` without depending on a
/// concrete driver.
pub trait StorageApi: Send + Sync {
    /// Returns the role of this handle.
    fn mode(&self) -> StorageMode;

    /// Returns the backend family of this handle.
    fn kind(&self) -> &StorageKind;
}
