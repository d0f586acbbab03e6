//! Swap request records and the book that tracks them.
//!
//! Resolution is a one-way write: `Pending → Accepted | Rejected`, performed
//! under a single entry guard so concurrent responders serialize. Terminal
//! requests stay in the book for history; eviction is not this crate's
//! concern.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::slot::{SlotId, UserId};

/// Opaque swap request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwapRequestId(uuid::Uuid);

impl SwapRequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for SwapRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SwapRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    Pending,
    Accepted,
    Rejected,
}

impl SwapStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One proposed 1-for-1 exchange between two slots of two different users.
///
/// Owner identities are denormalized at creation and fixed for the request's
/// lifetime; slot ownership cannot change while the slots are `Locked`.
#[derive(Debug, Clone, Serialize)]
pub struct SwapRequest {
    pub id: SwapRequestId,
    pub proposer_slot: SlotId,
    pub counterparty_slot: SlotId,
    pub proposer: UserId,
    pub counterparty: UserId,
    pub status: SwapStatus,
    pub created_at: DateTime<Utc>,
}

impl SwapRequest {
    pub fn new(
        proposer_slot: SlotId,
        counterparty_slot: SlotId,
        proposer: UserId,
        counterparty: UserId,
    ) -> Self {
        Self {
            id: SwapRequestId::new(),
            proposer_slot,
            counterparty_slot,
            proposer,
            counterparty,
            status: SwapStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn references(&self, slot: SlotId) -> bool {
        self.proposer_slot == slot || self.counterparty_slot == slot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("swap request not found")]
    NotFound,
    #[error("swap request already resolved")]
    AlreadyResolved,
}

/// A user's swap requests, partitioned by role.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SwapInbox {
    /// Requests where the user is the counterparty (theirs to answer).
    pub incoming: Vec<SwapRequest>,
    /// Requests the user proposed.
    pub outgoing: Vec<SwapRequest>,
}

/// Concurrent store of swap requests.
pub struct RequestBook {
    requests: DashMap<SwapRequestId, SwapRequest>,
}

impl RequestBook {
    pub fn new() -> Self {
        Self {
            requests: DashMap::new(),
        }
    }

    pub fn insert(&self, request: SwapRequest) {
        self.requests.insert(request.id, request);
    }

    pub fn get(&self, id: SwapRequestId) -> Option<SwapRequest> {
        self.requests.get(&id).map(|entry| entry.clone())
    }

    /// One-way resolution. Exactly one caller wins per request; everyone else
    /// observes `AlreadyResolved`. The check and the write share one entry
    /// guard.
    pub fn resolve(
        &self,
        id: SwapRequestId,
        verdict: SwapStatus,
    ) -> Result<SwapRequest, ResolveError> {
        debug_assert!(verdict.is_terminal(), "resolve takes a terminal status");
        let mut entry = self.requests.get_mut(&id).ok_or(ResolveError::NotFound)?;
        if entry.status != SwapStatus::Pending {
            return Err(ResolveError::AlreadyResolved);
        }
        entry.status = verdict;
        Ok(entry.clone())
    }

    /// Whether any pending request references the slot.
    pub fn has_pending_for(&self, slot: SlotId) -> bool {
        self.requests
            .iter()
            .any(|entry| entry.status == SwapStatus::Pending && entry.references(slot))
    }

    /// Number of pending requests referencing the slot. The negotiation
    /// invariant keeps this at most one.
    pub fn pending_for(&self, slot: SlotId) -> usize {
        self.requests
            .iter()
            .filter(|entry| entry.status == SwapStatus::Pending && entry.references(slot))
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.requests
            .iter()
            .filter(|entry| entry.status == SwapStatus::Pending)
            .count()
    }

    /// All requests involving the user, newest first in each partition.
    pub fn inbox_for(&self, user: UserId) -> SwapInbox {
        let mut inbox = SwapInbox::default();
        for entry in self.requests.iter() {
            if entry.counterparty == user {
                inbox.incoming.push(entry.clone());
            } else if entry.proposer == user {
                inbox.outgoing.push(entry.clone());
            }
        }
        inbox
            .incoming
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));
        inbox
            .outgoing
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));
        inbox
    }
}

impl Default for RequestBook {
    fn default() -> Self {
        Self::new()
    }
}
