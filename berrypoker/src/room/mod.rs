//! Room engine: the per-room actor, its message types, and the
//! process-wide registry.

pub mod actor;
pub mod messages;
pub mod registry;

pub use actor::{RoomActor, RoomRuntimeConfig};
pub use messages::{ConnectionId, RoomClosed, RoomEvent, RoomHandle, RoomSummary};
pub use registry::{RegistryConfig, RoomRegistry, RoomSettings};
