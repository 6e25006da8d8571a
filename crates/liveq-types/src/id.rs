//! Identifier newtypes.
//!
//! Four identifier domains cross the store boundary: application ids
//! (tenant tag), transaction ids (monotonic per app, produced by the
//! mutation ingest), internal entity ids (allocated by the store), and
//! session ids (UUIDs minted on socket accept).

use std::fmt;
use std::num::NonZeroU64;

use uuid::Uuid;

/// Application (tenant) identifier.
///
/// Every cached datalog query and every mutation batch is tagged with
/// the app it belongs to; the store is otherwise not tenant-isolated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct AppId(u64);

impl AppId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app#{}", self.0)
    }
}

/// Monotonically non-decreasing transaction id, scoped per [`AppId`].
///
/// Produced by the mutation ingest pipeline. The store only ever folds
/// these with `max`; it never allocates them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct TxId(u64);

impl TxId {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Fold two ids, keeping the larger. Concurrent updates to
    /// `processed_tx_id` resolve through this.
    #[inline]
    #[must_use]
    pub fn merge_max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// Internal entity id.
///
/// Allocated by the store's write path starting at 1; id 0 does not
/// exist, which lets `Option<EntityId>` stay pointer-sized.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct EntityId(NonZeroU64);

impl EntityId {
    /// Construct an `EntityId` from a raw value.
    ///
    /// Returns `None` for 0 (no entity has id 0).
    #[inline]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e#{}", self.0)
    }
}

impl TryFrom<u64> for EntityId {
    type Error = InvalidEntityId;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidEntityId)
    }
}

/// Error returned when attempting to create an `EntityId` from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidEntityId;

impl fmt::Display for InvalidEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid EntityId 0 (entity ids start at 1)")
    }
}

impl std::error::Error for InvalidEntityId {}

/// Session identifier: the UUID minted when a socket is accepted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    #[inline]
    pub const fn new(raw: Uuid) -> Self {
        Self(raw)
    }

    /// Mint a fresh random session id (used on socket accept).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    pub const fn get(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(raw: Uuid) -> Self {
        Self(raw)
    }
}
