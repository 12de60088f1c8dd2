//! QUIC-VC transport: a credential-driven handshake over raw UDP,
//! replacing TLS certificates with the [`chum_identity`] Verifiable
//! Credential model (spec §4.5).

pub mod connection;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod packet;

pub use connection::{CloseReason, Connection, ConnectionEvent, ConnectionState, CredentialVerifier};
pub use endpoint::{Endpoint, EndpointEvents, PeerClosed, PeerConnected, PeerFrame};
pub use error::{Error, Result};
pub use frame::{Frame, FrameType};
pub use packet::{ConnectionId, PacketHeader, PacketType};
