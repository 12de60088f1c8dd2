//! UDP broadcast peer discovery: announce/listen, peer expiration, and
//! the `peerDiscovered`/`peerLost` events the Pairing module consumes
//! (spec §4.6).

pub mod announcement;
pub mod error;
pub mod peer_map;
pub mod service;

pub use announcement::Announcement;
pub use error::Error;
pub use peer_map::{PeerEvent, PeerInfo, PeerMap, PEER_EXPIRY_SECS};
pub use service::{DiscoveryService, BROADCAST_INTERVAL_SECS, DISCOVERY_PORT};
