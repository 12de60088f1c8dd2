//! The CHUM wire protocol (spec §4.7): `ANNOUNCE`/`REQUEST`/`OBJECT`/
//! `DONE`/`DENY`, carried as JSON inside a QUIC-VC `Stream` frame (or,
//! over the WebSocket fallback transport, as a WebSocket binary message
//! with the same bytes).

use crate::error::{Error, Result};
use chum_types::Hash;
use chum_transport::{Frame, FrameType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// "I have these, and you are allowed to see them."
    Announce { hashes: Vec<Hash> },
    /// "Send me these."
    Request { hashes: Vec<Hash> },
    /// The raw bytes of one object: its type tag and JSON payload, plus
    /// the content hash the sender claims it hashes to.
    Object {
        hash: Hash,
        type_name: String,
        payload: serde_json::Value,
    },
    /// No further announcements for this cycle.
    Done,
    /// The peer requested a hash it isn't permitted to read.
    Deny { hash: Hash },
    /// Opaque application payload riding the same authenticated
    /// connection, e.g. the Pairing module's acknowledgement delivery —
    /// outside CHUM's object model, but with nowhere else to go once the
    /// handshake has already happened.
    PairingAck { payload: Vec<u8> },
}

impl SyncMessage {
    pub fn to_frame(&self) -> Result<Frame> {
        Ok(Frame::new(FrameType::Stream, serde_json::to_vec(self)?))
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        if frame.frame_type != FrameType::Stream {
            return Err(Error::NotAStreamFrame);
        }
        Ok(serde_json::from_slice(&frame.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_roundtrips_through_a_stream_frame() {
        let msg = SyncMessage::Announce {
            hashes: vec![Hash::of(b"a"), Hash::of(b"b")],
        };
        let frame = msg.to_frame().unwrap();
        assert_eq!(frame.frame_type, FrameType::Stream);
        assert_eq!(SyncMessage::from_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn non_stream_frame_is_rejected() {
        let frame = Frame::new(FrameType::Heartbeat, vec![]);
        assert!(matches!(SyncMessage::from_frame(&frame), Err(Error::NotAStreamFrame)));
    }
}
