//! CHUM Sync Engine: the content-addressed object exchange protocol
//! described in spec §4.7, layered on top of `chum-transport`'s QUIC-VC
//! connections and gated by `chum-store`'s Access Engine.

pub mod engine;
pub mod error;
pub mod message;
pub mod queue;
pub mod registry;

pub use engine::{PairingAckEvent, PeerLifecycleEvent, PeerLifecycleKind, SyncEngine};
pub use error::Error;
pub use message::SyncMessage;
pub use queue::{ExportQueue, ImportSet, IN_FLIGHT_WINDOW};
pub use registry::{is_sync_eligible, SYNC_ELIGIBLE_TYPES};
