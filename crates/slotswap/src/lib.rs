//! slotswap: negotiation core for two-party calendar slot swaps.

mod coordinator;
mod registry;
mod request;
mod slot;
mod version;

pub mod transport;

pub use coordinator::{SwapCoordinator, SwapError};
pub use registry::{MemoryRegistry, RegistryError, SlotPatch, SlotRegistry};
pub use request::{
    RequestBook, ResolveError, SwapInbox, SwapRequest, SwapRequestId, SwapStatus,
};
pub use slot::{InvalidTimeRange, Slot, SlotId, SlotStatus, UserId};
pub use version::{SLOTSWAP_VERSION, VersionInfo};
