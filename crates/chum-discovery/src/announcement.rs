//! The announcement payload broadcast every 5 s (spec §4.6) and carried
//! either as standalone UDP JSON or inside a QUIC-VC `Discovery` frame
//! (type `0x30`), which may itself wrap JSON or a compact binary form of
//! the same fields.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// `{deviceId, deviceName, capabilities, port, timestamp}` from §4.6;
/// `deviceId`/`port`/`capabilities` are required on the wire, the rest
/// optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Announcement {
    pub device_id: String,
    pub device_name: Option<String>,
    pub capabilities: Vec<String>,
    pub port: u16,
    pub timestamp: Option<i64>,
}

impl Announcement {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// A compact binary form for the `Discovery` transport frame:
    /// `deviceId(u8 len + utf8) | port(be u16) | capabilityCount(u8) |
    /// capability*(u8 len + utf8) | hasName(u8) | name? | hasTimestamp(u8)
    /// | timestamp?(be i64)`. `chum-transport`'s frame layer already
    /// supplies the outer type/length; this is just the payload.
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        if self.device_id.len() > u8::MAX as usize || self.capabilities.len() > u8::MAX as usize {
            return Err(Error::MalformedAnnouncement("field exceeds compact binary limits".into()));
        }
        let mut out = Vec::new();
        out.push(self.device_id.len() as u8);
        out.extend_from_slice(self.device_id.as_bytes());
        out.extend_from_slice(&self.port.to_be_bytes());
        out.push(self.capabilities.len() as u8);
        for cap in &self.capabilities {
            if cap.len() > u8::MAX as usize {
                return Err(Error::MalformedAnnouncement("capability string too long".into()));
            }
            out.push(cap.len() as u8);
            out.extend_from_slice(cap.as_bytes());
        }
        match &self.device_name {
            Some(name) if name.len() <= u8::MAX as usize => {
                out.push(1);
                out.push(name.len() as u8);
                out.extend_from_slice(name.as_bytes());
            }
            _ => out.push(0),
        }
        match self.timestamp {
            Some(ts) => {
                out.push(1);
                out.extend_from_slice(&ts.to_be_bytes());
            }
            None => out.push(0),
        }
        Ok(out)
    }

    pub fn from_binary(buf: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let device_id = read_string(buf, &mut pos)?;
        let port = u16::from_be_bytes(take(buf, &mut pos, 2)?.try_into().unwrap());
        let cap_count = *buf.get(pos).ok_or_else(too_short)?;
        pos += 1;
        let mut capabilities = Vec::with_capacity(cap_count as usize);
        for _ in 0..cap_count {
            capabilities.push(read_string(buf, &mut pos)?);
        }
        let has_name = *buf.get(pos).ok_or_else(too_short)?;
        pos += 1;
        let device_name = if has_name == 1 {
            Some(read_string(buf, &mut pos)?)
        } else {
            None
        };
        let has_timestamp = *buf.get(pos).ok_or_else(too_short)?;
        pos += 1;
        let timestamp = if has_timestamp == 1 {
            Some(i64::from_be_bytes(take(buf, &mut pos, 8)?.try_into().unwrap()))
        } else {
            None
        };
        Ok(Announcement {
            device_id,
            device_name,
            capabilities,
            port,
            timestamp,
        })
    }

    /// Parses either a QUIC-VC `Discovery` frame payload (JSON or the
    /// compact binary form, distinguished by the leading byte) or a bare
    /// UDP broadcast datagram (always JSON).
    pub fn decode_frame_payload(payload: &[u8]) -> Result<Self> {
        match payload.first() {
            Some(0x00) => Announcement::from_json(&payload[1..]),
            Some(0x01) => Announcement::from_binary(&payload[1..]),
            _ => Announcement::from_json(payload),
        }
    }

    pub fn encode_frame_payload_binary(&self) -> Result<Vec<u8>> {
        let mut out = vec![0x01];
        out.extend_from_slice(&self.to_binary()?);
        Ok(out)
    }
}

fn read_string(buf: &[u8], pos: &mut usize) -> Result<String> {
    let len = *buf.get(*pos).ok_or_else(too_short)? as usize;
    *pos += 1;
    let bytes = buf.get(*pos..*pos + len).ok_or_else(too_short)?;
    *pos += len;
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::MalformedAnnouncement("invalid utf-8".into()))
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let slice = buf.get(*pos..*pos + len).ok_or_else(too_short)?;
    *pos += len;
    Ok(slice)
}

fn too_short() -> Error {
    Error::MalformedAnnouncement("truncated announcement payload".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Announcement {
        Announcement {
            device_id: "device-1".into(),
            device_name: Some("Alice's laptop".into()),
            capabilities: vec!["chum/1".into(), "sync".into()],
            port: 49500,
            timestamp: Some(1_700_000_000_000),
        }
    }

    #[test]
    fn json_roundtrips() {
        let a = sample();
        let bytes = a.to_json().unwrap();
        assert_eq!(Announcement::from_json(&bytes).unwrap(), a);
    }

    #[test]
    fn binary_roundtrips() {
        let a = sample();
        let bytes = a.to_binary().unwrap();
        assert_eq!(Announcement::from_binary(&bytes).unwrap(), a);
    }

    #[test]
    fn binary_roundtrips_without_optional_fields() {
        let a = Announcement {
            device_id: "d".into(),
            device_name: None,
            capabilities: vec![],
            port: 1,
            timestamp: None,
        };
        let bytes = a.to_binary().unwrap();
        assert_eq!(Announcement::from_binary(&bytes).unwrap(), a);
    }

    #[test]
    fn frame_payload_dispatches_on_leading_byte() {
        let a = sample();
        let binary_payload = a.encode_frame_payload_binary().unwrap();
        assert_eq!(Announcement::decode_frame_payload(&binary_payload).unwrap(), a);

        let mut json_payload = vec![0x00];
        json_payload.extend_from_slice(&a.to_json().unwrap());
        assert_eq!(Announcement::decode_frame_payload(&json_payload).unwrap(), a);
    }
}
