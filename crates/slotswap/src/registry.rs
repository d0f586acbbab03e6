//! Slot Registry - the storage boundary for slot records.
//!
//! The registry exposes exactly one synchronization primitive to the
//! negotiation core: `try_transition`, an atomic compare-and-swap on a slot's
//! exchange status. Every check-and-write happens under a single entry guard;
//! there is no read-then-write in application code. No negotiation semantics
//! live here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Deserialize;

use crate::slot::{InvalidTimeRange, Slot, SlotId, SlotStatus, UserId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("slot not found")]
    NotFound,
    /// The stored status did not match the expectation. Routine signal under
    /// contention, not a failure; the coordinator interprets it.
    #[error("slot status conflict (currently {actual})")]
    Conflict { actual: SlotStatus },
    #[error(transparent)]
    InvalidRange(#[from] InvalidTimeRange),
}

/// Fields an owner may change on a slot they hold.
///
/// `status` may only move between `Held` and `Offered`; the `Locked` status
/// belongs to the swap coordinator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlotPatch {
    pub title: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub status: Option<SlotStatus>,
}

/// Storage contract consumed by the swap coordinator and the CRUD surface.
#[async_trait]
pub trait SlotRegistry: Send + Sync {
    async fn insert(&self, slot: Slot) -> Result<(), RegistryError>;

    async fn get(&self, id: SlotId) -> Result<Slot, RegistryError>;

    /// Atomically set `next` only if the stored status equals `expected`.
    /// Returns `Conflict` with the actual status otherwise, with no effect.
    async fn try_transition(
        &self,
        id: SlotId,
        expected: SlotStatus,
        next: SlotStatus,
    ) -> Result<(), RegistryError>;

    /// Unconditional status write. Called only while the coordinator holds
    /// the slot `Locked`; the protocol guarantees exclusivity, so this does
    /// not re-check.
    async fn set_status(&self, id: SlotId, status: SlotStatus) -> Result<(), RegistryError>;

    /// Unconditional owner write. Same protocol guarantee as `set_status`.
    async fn reassign_owner(&self, id: SlotId, new_owner: UserId) -> Result<(), RegistryError>;

    /// Owner-driven update. Refused while the slot is `Locked`.
    async fn update(
        &self,
        id: SlotId,
        owner: UserId,
        patch: SlotPatch,
    ) -> Result<Slot, RegistryError>;

    /// Owner-driven delete. Refused while the slot is `Locked`.
    async fn remove(&self, id: SlotId, owner: UserId) -> Result<(), RegistryError>;

    /// All slots owned by `owner`, earliest start first.
    async fn slots_for_owner(&self, owner: UserId) -> Vec<Slot>;

    /// Marketplace listing: `Offered` slots not owned by `owner`.
    async fn offered_excluding(&self, owner: UserId) -> Vec<Slot>;

    /// All `Locked` slots, for the orphan reconciliation sweep.
    async fn locked(&self) -> Vec<Slot>;

    async fn count(&self) -> usize;
}

/// In-memory registry. The DashMap entry guard serializes each check-and-set,
/// making `try_transition` a genuine CAS.
pub struct MemoryRegistry {
    slots: DashMap<SlotId, Slot>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlotRegistry for MemoryRegistry {
    async fn insert(&self, slot: Slot) -> Result<(), RegistryError> {
        match self.slots.entry(slot.id) {
            Entry::Occupied(existing) => Err(RegistryError::Conflict {
                actual: existing.get().status,
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(())
            }
        }
    }

    async fn get(&self, id: SlotId) -> Result<Slot, RegistryError> {
        self.slots
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or(RegistryError::NotFound)
    }

    async fn try_transition(
        &self,
        id: SlotId,
        expected: SlotStatus,
        next: SlotStatus,
    ) -> Result<(), RegistryError> {
        let mut entry = self.slots.get_mut(&id).ok_or(RegistryError::NotFound)?;
        if entry.status != expected {
            return Err(RegistryError::Conflict {
                actual: entry.status,
            });
        }
        entry.status = next;
        Ok(())
    }

    async fn set_status(&self, id: SlotId, status: SlotStatus) -> Result<(), RegistryError> {
        let mut entry = self.slots.get_mut(&id).ok_or(RegistryError::NotFound)?;
        entry.status = status;
        Ok(())
    }

    async fn reassign_owner(&self, id: SlotId, new_owner: UserId) -> Result<(), RegistryError> {
        let mut entry = self.slots.get_mut(&id).ok_or(RegistryError::NotFound)?;
        entry.owner = new_owner;
        Ok(())
    }

    async fn update(
        &self,
        id: SlotId,
        owner: UserId,
        patch: SlotPatch,
    ) -> Result<Slot, RegistryError> {
        let mut entry = self.slots.get_mut(&id).ok_or(RegistryError::NotFound)?;
        if entry.owner != owner {
            // Hide other users' slots, as the lookup is owner-scoped.
            return Err(RegistryError::NotFound);
        }
        if entry.status == SlotStatus::Locked {
            return Err(RegistryError::Conflict {
                actual: SlotStatus::Locked,
            });
        }
        if patch.status == Some(SlotStatus::Locked) {
            return Err(RegistryError::Conflict {
                actual: entry.status,
            });
        }
        let start = patch.start.unwrap_or(entry.start);
        let end = patch.end.unwrap_or(entry.end);
        if start >= end {
            return Err(InvalidTimeRange { start, end }.into());
        }
        if let Some(title) = patch.title {
            entry.title = title;
        }
        entry.start = start;
        entry.end = end;
        if let Some(status) = patch.status {
            entry.status = status;
        }
        Ok(entry.clone())
    }

    async fn remove(&self, id: SlotId, owner: UserId) -> Result<(), RegistryError> {
        match self.slots.entry(id) {
            Entry::Occupied(existing) => {
                if existing.get().owner != owner {
                    return Err(RegistryError::NotFound);
                }
                if existing.get().status == SlotStatus::Locked {
                    return Err(RegistryError::Conflict {
                        actual: SlotStatus::Locked,
                    });
                }
                existing.remove();
                Ok(())
            }
            Entry::Vacant(_) => Err(RegistryError::NotFound),
        }
    }

    async fn slots_for_owner(&self, owner: UserId) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self
            .slots
            .iter()
            .filter(|entry| entry.owner == owner)
            .map(|entry| entry.clone())
            .collect();
        slots.sort_by_key(|slot| slot.start);
        slots
    }

    async fn offered_excluding(&self, owner: UserId) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self
            .slots
            .iter()
            .filter(|entry| entry.status == SlotStatus::Offered && entry.owner != owner)
            .map(|entry| entry.clone())
            .collect();
        slots.sort_by_key(|slot| slot.start);
        slots
    }

    async fn locked(&self) -> Vec<Slot> {
        self.slots
            .iter()
            .filter(|entry| entry.status == SlotStatus::Locked)
            .map(|entry| entry.clone())
            .collect()
    }

    async fn count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn slot(owner: UserId, status: SlotStatus) -> Slot {
        let start = Utc::now();
        let mut slot = Slot::new(owner, "slot".to_string(), start, start + TimeDelta::hours(1))
            .expect("valid range");
        slot.status = status;
        slot
    }

    #[tokio::test]
    async fn transition_succeeds_on_expected_status() {
        let registry = MemoryRegistry::new();
        let s = slot(UserId::new(), SlotStatus::Offered);
        let id = s.id;
        registry.insert(s).await.unwrap();

        registry
            .try_transition(id, SlotStatus::Offered, SlotStatus::Locked)
            .await
            .unwrap();
        assert_eq!(registry.get(id).await.unwrap().status, SlotStatus::Locked);
    }

    #[tokio::test]
    async fn transition_conflicts_on_unexpected_status() {
        let registry = MemoryRegistry::new();
        let s = slot(UserId::new(), SlotStatus::Held);
        let id = s.id;
        registry.insert(s).await.unwrap();

        let err = registry
            .try_transition(id, SlotStatus::Offered, SlotStatus::Locked)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Conflict {
                actual: SlotStatus::Held
            }
        );
        // No partial effect.
        assert_eq!(registry.get(id).await.unwrap().status, SlotStatus::Held);
    }

    #[tokio::test]
    async fn transition_missing_slot_is_not_found() {
        let registry = MemoryRegistry::new();
        let err = registry
            .try_transition(SlotId::new(), SlotStatus::Offered, SlotStatus::Locked)
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::NotFound);
    }

    #[tokio::test]
    async fn concurrent_transitions_one_winner() {
        use std::sync::Arc;

        let registry = Arc::new(MemoryRegistry::new());
        let s = slot(UserId::new(), SlotStatus::Offered);
        let id = s.id;
        registry.insert(s).await.unwrap();

        let attempts = (0..16).map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .try_transition(id, SlotStatus::Offered, SlotStatus::Locked)
                    .await
            })
        });
        let results = futures::future::join_all(attempts).await;
        let wins = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(()))))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(registry.get(id).await.unwrap().status, SlotStatus::Locked);
    }

    #[tokio::test]
    async fn insert_duplicate_id_conflicts() {
        let registry = MemoryRegistry::new();
        let s = slot(UserId::new(), SlotStatus::Held);
        registry.insert(s.clone()).await.unwrap();
        assert!(matches!(
            registry.insert(s).await,
            Err(RegistryError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn update_refuses_locked_slot() {
        let registry = MemoryRegistry::new();
        let owner = UserId::new();
        let s = slot(owner, SlotStatus::Locked);
        let id = s.id;
        registry.insert(s).await.unwrap();

        let err = registry
            .update(
                id,
                owner,
                SlotPatch {
                    title: Some("new title".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Conflict {
                actual: SlotStatus::Locked
            }
        );
    }

    #[tokio::test]
    async fn update_refuses_locked_status_in_patch() {
        let registry = MemoryRegistry::new();
        let owner = UserId::new();
        let s = slot(owner, SlotStatus::Offered);
        let id = s.id;
        registry.insert(s).await.unwrap();

        let err = registry
            .update(
                id,
                owner,
                SlotPatch {
                    status: Some(SlotStatus::Locked),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { .. }));
    }

    #[tokio::test]
    async fn update_by_non_owner_is_not_found() {
        let registry = MemoryRegistry::new();
        let s = slot(UserId::new(), SlotStatus::Held);
        let id = s.id;
        registry.insert(s).await.unwrap();

        let err = registry
            .update(id, UserId::new(), SlotPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::NotFound);
    }

    #[tokio::test]
    async fn update_validates_patched_time_range() {
        let registry = MemoryRegistry::new();
        let owner = UserId::new();
        let s = slot(owner, SlotStatus::Held);
        let id = s.id;
        let start = s.start;
        registry.insert(s).await.unwrap();

        let err = registry
            .update(
                id,
                owner,
                SlotPatch {
                    end: Some(start - TimeDelta::hours(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRange(_)));
    }

    #[tokio::test]
    async fn owner_can_offer_and_withdraw() {
        let registry = MemoryRegistry::new();
        let owner = UserId::new();
        let s = slot(owner, SlotStatus::Held);
        let id = s.id;
        registry.insert(s).await.unwrap();

        let updated = registry
            .update(
                id,
                owner,
                SlotPatch {
                    status: Some(SlotStatus::Offered),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, SlotStatus::Offered);

        let updated = registry
            .update(
                id,
                owner,
                SlotPatch {
                    status: Some(SlotStatus::Held),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, SlotStatus::Held);
    }

    #[tokio::test]
    async fn remove_refuses_locked_slot() {
        let registry = MemoryRegistry::new();
        let owner = UserId::new();
        let s = slot(owner, SlotStatus::Locked);
        let id = s.id;
        registry.insert(s).await.unwrap();

        assert!(matches!(
            registry.remove(id, owner).await,
            Err(RegistryError::Conflict { .. })
        ));
        assert!(registry.get(id).await.is_ok());
    }

    #[tokio::test]
    async fn listings_filter_and_sort() {
        let registry = MemoryRegistry::new();
        let alice = UserId::new();
        let bob = UserId::new();

        let later = {
            let mut s = slot(alice, SlotStatus::Offered);
            s.start += TimeDelta::days(1);
            s.end += TimeDelta::days(1);
            s
        };
        let earlier = slot(alice, SlotStatus::Held);
        let bobs = slot(bob, SlotStatus::Offered);

        registry.insert(later.clone()).await.unwrap();
        registry.insert(earlier.clone()).await.unwrap();
        registry.insert(bobs.clone()).await.unwrap();

        let mine = registry.slots_for_owner(alice).await;
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].id, earlier.id);
        assert_eq!(mine[1].id, later.id);

        let market = registry.offered_excluding(bob).await;
        assert_eq!(market.len(), 1);
        assert_eq!(market[0].id, later.id);

        assert_eq!(registry.count().await, 3);
        assert!(registry.locked().await.is_empty());
    }
}
