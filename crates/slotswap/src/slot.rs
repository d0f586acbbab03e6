//! Slot records and their exchange status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque slot identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(uuid::Uuid);

impl SlotId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque user identifier. The core compares identities; it holds no user data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(uuid::Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exchange status of a slot.
///
/// `Held ↔ Offered` is owner-driven. `Locked` is entered and left only by the
/// swap coordinator: a slot is `Locked` exactly while one pending swap request
/// references it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    /// Owned and not offered for exchange.
    Held,
    /// Owner marked the slot exchangeable; no active request.
    Offered,
    /// A pending swap request references this slot.
    Locked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Held => "HELD",
            Self::Offered => "OFFERED",
            Self::Locked => "LOCKED",
        }
    }
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The time range does not satisfy `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("slot time range is empty or inverted (start {start}, end {end})")]
pub struct InvalidTimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One bookable interval owned by exactly one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    pub owner: UserId,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: SlotStatus,
}

impl Slot {
    /// Create a slot in `Held` status. The time range is validated here and
    /// never re-checked by the negotiation core.
    pub fn new(
        owner: UserId,
        title: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, InvalidTimeRange> {
        if start >= end {
            return Err(InvalidTimeRange { start, end });
        }
        Ok(Self {
            id: SlotId::new(),
            owner,
            title,
            start,
            end,
            status: SlotStatus::Held,
        })
    }
}
