//! Frame header and the frame type subset listed in spec §4.5:
//! `type(1) | length(2) | payload(length)`. Frame payloads are opaque
//! bytes at this layer; `chum-sync` and the Discovery module own their
//! own JSON/binary encodings inside a `Stream`/`Discovery` frame.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    VcInit,
    VcResponse,
    VcAck,
    Stream,
    Ack,
    Heartbeat,
    Discovery,
    Close,
}

impl FrameType {
    fn code(self) -> u8 {
        match self {
            FrameType::VcInit => 0x10,
            FrameType::VcResponse => 0x11,
            FrameType::VcAck => 0x12,
            FrameType::Stream => 0x08,
            FrameType::Ack => 0x02,
            FrameType::Heartbeat => 0x20,
            FrameType::Discovery => 0x30,
            FrameType::Close => 0x1C,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        match code {
            0x10 => Ok(FrameType::VcInit),
            0x11 => Ok(FrameType::VcResponse),
            0x12 => Ok(FrameType::VcAck),
            0x08 => Ok(FrameType::Stream),
            0x02 => Ok(FrameType::Ack),
            0x20 => Ok(FrameType::Heartbeat),
            0x30 => Ok(FrameType::Discovery),
            0x1C => Ok(FrameType::Close),
            other => Err(Error::MalformedFrame(format!("unknown frame type 0x{other:02x}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Frame { frame_type, payload }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.payload.len() > u16::MAX as usize {
            return Err(Error::MalformedFrame("frame payload exceeds 64KiB".into()));
        }
        let mut out = Vec::with_capacity(3 + self.payload.len());
        out.push(self.frame_type.code());
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Decodes one frame from the front of `buf`, returning it along with
    /// the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let code = *buf.first().ok_or_else(too_short)?;
        let frame_type = FrameType::from_code(code)?;
        let len = u16::from_be_bytes(buf.get(1..3).ok_or_else(too_short)?.try_into().unwrap()) as usize;
        let payload = buf.get(3..3 + len).ok_or_else(too_short)?.to_vec();
        Ok((Frame::new(frame_type, payload), 3 + len))
    }

    /// Decodes every frame packed back-to-back in `buf` (the layout of a
    /// packet's decrypted frame region).
    pub fn decode_all(mut buf: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while !buf.is_empty() {
            let (frame, consumed) = Frame::decode(buf)?;
            frames.push(frame);
            buf = &buf[consumed..];
        }
        Ok(frames)
    }

    pub fn encode_all(frames: &[Frame]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for frame in frames {
            out.extend_from_slice(&frame.encode()?);
        }
        Ok(out)
    }
}

fn too_short() -> Error {
    Error::MalformedFrame("truncated frame".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrips() {
        let frame = Frame::new(FrameType::Heartbeat, vec![1, 2, 3]);
        let encoded = frame.encode().unwrap();
        let (decoded, consumed) = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn multiple_frames_decode_in_order() {
        let frames = vec![
            Frame::new(FrameType::VcInit, vec![9, 9]),
            Frame::new(FrameType::Ack, vec![]),
            Frame::new(FrameType::Stream, vec![1; 10]),
        ];
        let encoded = Frame::encode_all(&frames).unwrap();
        let decoded = Frame::decode_all(&encoded).unwrap();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn unknown_frame_type_rejected() {
        let err = Frame::decode(&[0xFF, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }
}
