//! Swap Coordinator - orchestrates the negotiation protocol.
//!
//! The coordinator is the only component permitted to move a slot into or
//! out of `Locked`. Locking in `propose` is two-phase with explicit
//! compensation: claim the proposer's slot, claim the counterparty's, and on
//! a lost second claim roll the first back. That closes the race window two
//! simultaneous proposals would otherwise share, without asking the registry
//! for anything beyond a single-record CAS.
//!
//! In `respond`, the request is resolved before any slot is touched: the
//! one-way request write is the authoritative outcome, and the slot effects
//! that follow are replayable from it.

use std::sync::Arc;

use crate::registry::SlotRegistry;
use crate::request::{RequestBook, ResolveError, SwapInbox, SwapRequest, SwapRequestId, SwapStatus};
use crate::slot::{SlotId, SlotStatus, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SwapError {
    #[error("swap request not found")]
    NotFound,
    #[error("not eligible: {0}")]
    NotEligible(&'static str),
    /// Lost a locking race. Retry against a fresh listing, not the same pair.
    #[error("slot is no longer available")]
    SlotUnavailable,
    #[error("only the counterparty may respond to this request")]
    Forbidden,
    #[error("swap request already resolved")]
    AlreadyResolved,
}

/// Transport-agnostic negotiation core over an injected slot registry.
pub struct SwapCoordinator {
    registry: Arc<dyn SlotRegistry>,
    requests: RequestBook,
}

impl SwapCoordinator {
    pub fn new(registry: Arc<dyn SlotRegistry>) -> Self {
        Self {
            registry,
            requests: RequestBook::new(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn SlotRegistry> {
        &self.registry
    }

    pub fn requests(&self) -> &RequestBook {
        &self.requests
    }

    /// Propose a 1-for-1 swap of `my_slot_id` (owned by `proposer`) for
    /// `their_slot_id`.
    ///
    /// On success both slots are `Locked` and a `Pending` request references
    /// them. On any failure no request exists and neither slot keeps a lock
    /// from this call.
    pub async fn propose(
        &self,
        proposer: UserId,
        my_slot_id: SlotId,
        their_slot_id: SlotId,
    ) -> Result<SwapRequest, SwapError> {
        let mine = self
            .registry
            .get(my_slot_id)
            .await
            .map_err(|_| SwapError::NotEligible("your slot was not found"))?;
        if mine.owner != proposer {
            return Err(SwapError::NotEligible("you do not own the offered slot"));
        }
        if mine.status != SlotStatus::Offered {
            return Err(SwapError::NotEligible(
                "your slot is not offered for exchange",
            ));
        }

        let theirs = self
            .registry
            .get(their_slot_id)
            .await
            .map_err(|_| SwapError::NotEligible("counterparty slot was not found"))?;
        if theirs.status != SlotStatus::Offered {
            return Err(SwapError::NotEligible(
                "counterparty slot is not offered for exchange",
            ));
        }
        if theirs.owner == proposer {
            // Also covers my_slot_id == their_slot_id.
            return Err(SwapError::NotEligible("cannot swap with your own slot"));
        }

        // Phase one: claim our own slot. A conflict means another proposal
        // won the race between the read above and now.
        if self
            .registry
            .try_transition(my_slot_id, SlotStatus::Offered, SlotStatus::Locked)
            .await
            .is_err()
        {
            return Err(SwapError::SlotUnavailable);
        }

        // Phase two: claim theirs; compensate on failure.
        if let Err(e) = self
            .registry
            .try_transition(their_slot_id, SlotStatus::Offered, SlotStatus::Locked)
            .await
        {
            tracing::debug!(
                slot = %their_slot_id,
                error = %e,
                "lost counterparty lock race, rolling back proposer lock"
            );
            if let Err(e) = self
                .registry
                .try_transition(my_slot_id, SlotStatus::Locked, SlotStatus::Offered)
                .await
            {
                // The slot is now an orphan: Locked with no request
                // referencing it. reconcile_orphans finds and resets it.
                tracing::error!(
                    slot = %my_slot_id,
                    error = %e,
                    "compensation failed, slot orphaned in LOCKED"
                );
            }
            return Err(SwapError::SlotUnavailable);
        }

        let request = SwapRequest::new(my_slot_id, their_slot_id, proposer, theirs.owner);
        self.requests.insert(request.clone());
        tracing::info!(
            request = %request.id,
            proposer_slot = %my_slot_id,
            counterparty_slot = %their_slot_id,
            "swap proposed"
        );
        Ok(request)
    }

    /// Accept or reject a pending request. Only the counterparty may respond.
    ///
    /// Acceptance crosses the two slots' owners and parks both in `Held`;
    /// rejection returns both to `Offered`. Ownership never changes on
    /// rejection.
    pub async fn respond(
        &self,
        responder: UserId,
        request_id: SwapRequestId,
        accept: bool,
    ) -> Result<SwapRequest, SwapError> {
        let request = self.requests.get(request_id).ok_or(SwapError::NotFound)?;
        if request.counterparty != responder {
            return Err(SwapError::Forbidden);
        }

        let verdict = if accept {
            SwapStatus::Accepted
        } else {
            SwapStatus::Rejected
        };
        // Resolve first: the request record is the authoritative outcome, and
        // concurrent responders serialize on this write.
        let resolved = self
            .requests
            .resolve(request_id, verdict)
            .map_err(|e| match e {
                ResolveError::NotFound => SwapError::NotFound,
                ResolveError::AlreadyResolved => SwapError::AlreadyResolved,
            })?;

        // Slot effects are unconditional writes: the resolved request held
        // exclusive logical ownership of both slots while they were Locked,
        // so nothing else can have interleaved.
        if accept {
            self.settle_slot(&resolved, resolved.proposer_slot, Some(resolved.counterparty))
                .await;
            self.settle_slot(&resolved, resolved.counterparty_slot, Some(resolved.proposer))
                .await;
        } else {
            self.settle_slot(&resolved, resolved.proposer_slot, None).await;
            self.settle_slot(&resolved, resolved.counterparty_slot, None)
                .await;
        }

        tracing::info!(request = %resolved.id, status = %resolved.status, "swap resolved");
        Ok(resolved)
    }

    /// Release one slot after resolution. `new_owner` is set on acceptance
    /// (ownership transfers, slot parks in `Held`); on rejection the slot
    /// returns to `Offered` untouched.
    async fn settle_slot(&self, request: &SwapRequest, slot: SlotId, new_owner: Option<UserId>) {
        let result = match new_owner {
            Some(owner) => match self.registry.reassign_owner(slot, owner).await {
                Ok(()) => self.registry.set_status(slot, SlotStatus::Held).await,
                Err(e) => Err(e),
            },
            None => self.registry.set_status(slot, SlotStatus::Offered).await,
        };
        if let Err(e) = result {
            tracing::error!(
                request = %request.id,
                slot = %slot,
                error = %e,
                "slot settlement failed after resolution"
            );
        }
    }

    /// All requests involving `user`, partitioned into incoming (user is the
    /// counterparty) and outgoing (user proposed). Pure read.
    pub fn list_for_user(&self, user: UserId) -> SwapInbox {
        self.requests.inbox_for(user)
    }

    /// Reset slots stuck in `Locked` with no pending request referencing
    /// them. Returns the number repaired.
    ///
    /// Such orphans exist only if compensation failed mid-`propose`. This is
    /// an operational path: run it while proposals are quiesced, since a
    /// proposal between its first lock and its request insert briefly looks
    /// like an orphan.
    pub async fn reconcile_orphans(&self) -> usize {
        let mut repaired = 0;
        for slot in self.registry.locked().await {
            if self.requests.has_pending_for(slot.id) {
                continue;
            }
            match self
                .registry
                .try_transition(slot.id, SlotStatus::Locked, SlotStatus::Offered)
                .await
            {
                Ok(()) => {
                    tracing::warn!(slot = %slot.id, "orphaned lock reset to OFFERED");
                    repaired += 1;
                }
                Err(e) => {
                    tracing::debug!(slot = %slot.id, error = %e, "orphan candidate changed underfoot");
                }
            }
        }
        repaired
    }
}
