//! QUIC-VC connection state machine (spec §4.5): handshake, key
//! derivation across the three generations, packet protection, replay
//! rejection, and heartbeat/idle bookkeeping.
//!
//! [`Connection`] is deliberately synchronous and free of any socket —
//! it consumes and produces packet bytes through plain methods, so the
//! handshake and replay-window logic is unit-testable without a real
//! UDP socket, in-process loopback, or tokio runtime beyond what the
//! surrounding crate's async methods need for credential verification.
//! [`crate::endpoint`] drives a `Connection` over a real `UdpSocket` and
//! owns the heartbeat/idle timers.

use crate::crypto::{Generation, KeySet};
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameType};
use crate::packet::{reconstruct_packet_number, ConnectionId, PacketHeader, PacketType, VERSION};
use async_trait::async_trait;
use chum_types::VerifiableCredential;
use rand::RngCore;
use serde::{Deserialize, Serialize};

pub const HANDSHAKE_TIMEOUT_SECS: u64 = 5;
pub const IDLE_TIMEOUT_SECS: u64 = 120;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
/// Packets with a number `<= highest_received - REPLAY_WINDOW` are dropped.
pub const REPLAY_WINDOW: u64 = 64;
const DECRYPTION_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    Handshake,
    Established,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    IdleTimeout,
    HandshakeTimeout,
    InvalidCredential,
    DecryptionFailure,
    PeerClosed,
    Local,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::IdleTimeout => "Idle timeout",
            CloseReason::HandshakeTimeout => "Handshake timeout",
            CloseReason::InvalidCredential => "InvalidCredential",
            CloseReason::DecryptionFailure => "DecryptionFailure",
            CloseReason::PeerClosed => "peer closed",
            CloseReason::Local => "local close",
        };
        write!(f, "{s}")
    }
}

/// What processing an inbound packet (or a timer tick) produced.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Bytes the caller should send back to the peer immediately.
    Send(Vec<u8>),
    /// Non-handshake frames decoded from a `Protected` packet, handed up
    /// to `chum-sync`/Discovery.
    Frames(Vec<Frame>),
    HandshakeComplete,
    Closed(CloseReason),
}

#[derive(Serialize, Deserialize)]
struct VcInitPayload {
    credential: VerifiableCredential,
    challenge: [u8; 32],
    timestamp: i64,
}

#[derive(Serialize, Deserialize)]
struct VcResponsePayload {
    credential: VerifiableCredential,
    challenge: [u8; 32],
    ack_challenge: [u8; 32],
    timestamp: i64,
}

#[derive(Serialize, Deserialize)]
struct VcAckPayload {
    ack_challenge: [u8; 32],
}

/// Injected so `chum-transport` doesn't need to depend on `chum-store`
/// for trust-level lookups; `chum-node` wires this to
/// `chum_identity::CredentialManager` plus a trust check.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Signature, expiry, and revocation check — does not imply trust.
    async fn verify(&self, vc: &VerifiableCredential) -> Result<bool>;
    /// Whether the local side has accepted this issuer (trust level
    /// `Accepted`); an untrusted issuer still fails the handshake even
    /// with a structurally valid credential.
    async fn issuer_trusted(&self, issuer: chum_types::PersonId) -> Result<bool>;
}

#[async_trait]
impl CredentialVerifier for chum_identity::CredentialManager {
    async fn verify(&self, vc: &VerifiableCredential) -> Result<bool> {
        Ok(chum_identity::CredentialManager::verify(self, vc).await?)
    }

    async fn issuer_trusted(&self, issuer: chum_types::PersonId) -> Result<bool> {
        let level = chum_identity::CredentialManager::trust_level(self, issuer).await?;
        Ok(level == chum_types::TrustLevel::Accepted)
    }
}

struct ReplayWindow {
    highest_received: u64,
    /// Bit `i` (from the low end) records whether `highest_received - i`
    /// has been seen, for `i` in `0..REPLAY_WINDOW`.
    seen: u64,
}

impl ReplayWindow {
    fn new() -> Self {
        ReplayWindow {
            highest_received: 0,
            seen: 0,
        }
    }

    /// Returns `Ok(())` if `pn` is acceptable and records it as seen;
    /// `Err` if it's a replay (already seen or too far behind the window).
    fn accept(&mut self, pn: u64, first_packet: bool) -> Result<()> {
        if first_packet && pn == 0 {
            self.highest_received = 0;
            self.seen = 1;
            return Ok(());
        }
        if pn > self.highest_received || (first_packet && self.seen == 0) {
            let shift = pn.saturating_sub(self.highest_received);
            if shift >= REPLAY_WINDOW {
                self.seen = 0;
            } else {
                self.seen <<= shift;
            }
            self.seen |= 1;
            self.highest_received = pn;
            return Ok(());
        }
        let distance = self.highest_received - pn;
        if distance >= REPLAY_WINDOW {
            return Err(Error::Replayed(pn));
        }
        let bit = 1u64 << distance;
        if self.seen & bit != 0 {
            return Err(Error::Replayed(pn));
        }
        self.seen |= bit;
        Ok(())
    }
}

pub struct Connection {
    pub is_client: bool,
    pub local_cid: ConnectionId,
    pub remote_cid: Option<ConnectionId>,
    pub state: ConnectionState,
    local_vc: VerifiableCredential,
    remote_vc: Option<VerifiableCredential>,
    local_challenge: [u8; 32],
    remote_challenge: Option<[u8; 32]>,
    initial_keys: Option<KeySet>,
    handshake_keys: Option<KeySet>,
    application_keys: Option<KeySet>,
    send_packet_number: u64,
    replay: ReplayWindow,
    decryption_failures: u32,
    handshake_started_at_millis: i64,
    last_activity_millis: i64,
}

fn random_challenge() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

fn initial_info(dcid: ConnectionId, scid: ConnectionId) -> Vec<u8> {
    let mut info = Vec::with_capacity(32);
    info.extend_from_slice(&dcid.0);
    info.extend_from_slice(&scid.0);
    info
}

fn application_info(challenge_c: &[u8; 32], challenge_s: &[u8; 32], local_pk: &[u8], remote_pk: &[u8]) -> Vec<u8> {
    let mut info = Vec::new();
    info.extend_from_slice(challenge_c);
    info.extend_from_slice(challenge_s);
    let (first, second) = if local_pk <= remote_pk {
        (local_pk, remote_pk)
    } else {
        (remote_pk, local_pk)
    };
    info.extend_from_slice(first);
    info.extend_from_slice(second);
    info
}

impl Connection {
    /// Begins a client-initiated handshake: picks random `dcid`/`scid`,
    /// derives initial keys, and returns the `Connection` plus the
    /// `INITIAL` packet bytes to send.
    pub fn initiate(local_vc: VerifiableCredential, now_millis: i64) -> (Self, Vec<u8>) {
        let local_cid = ConnectionId::random();
        let dcid = ConnectionId::random();
        let challenge = random_challenge();

        let initial_keys = KeySet::derive(Generation::Initial, &initial_info(dcid, local_cid), true);

        let mut conn = Connection {
            is_client: true,
            local_cid,
            remote_cid: Some(dcid),
            state: ConnectionState::Initial,
            local_vc,
            remote_vc: None,
            local_challenge: challenge,
            remote_challenge: None,
            initial_keys: Some(initial_keys),
            handshake_keys: None,
            application_keys: None,
            send_packet_number: 0,
            replay: ReplayWindow::new(),
            decryption_failures: 0,
            handshake_started_at_millis: now_millis,
            last_activity_millis: now_millis,
        };

        let payload = VcInitPayload {
            credential: conn.local_vc.clone(),
            challenge,
            timestamp: now_millis,
        };
        let frame = Frame::new(FrameType::VcInit, serde_json::to_vec(&payload).expect("serializable"));
        let packet = conn.seal_packet(PacketType::Initial, conn.initial_keys.clone().unwrap(), &[frame]);
        (conn, packet)
    }

    /// Accepts a server-side connection from a freshly received `INITIAL`
    /// packet. Returns the `Connection` (state `Handshake`) and the
    /// `HANDSHAKE` packet to send back, or closes immediately on an
    /// invalid credential.
    pub async fn accept(
        raw: &[u8],
        local_vc: VerifiableCredential,
        verifier: &dyn CredentialVerifier,
        now_millis: i64,
    ) -> Result<(Self, Vec<u8>)> {
        let (header, header_len) = PacketHeader::decode(raw)?;
        if header.packet_type != PacketType::Initial {
            return Err(Error::MalformedPacket("expected INITIAL packet".into()));
        }
        let local_cid = ConnectionId::random();
        let remote_cid = header.scid;

        let initial_keys = KeySet::derive(Generation::Initial, &initial_info(header.dcid, header.scid), false);
        let frame_region = &raw[header_len..];
        let plaintext = initial_keys.open(0, &raw[..header_len], frame_region)?;
        let frames = Frame::decode_all(&plaintext)?;
        let vc_init = frames
            .iter()
            .find(|f| f.frame_type == FrameType::VcInit)
            .ok_or_else(|| Error::MalformedPacket("INITIAL packet missing VC_INIT frame".into()))?;
        let init: VcInitPayload = serde_json::from_slice(&vc_init.payload)?;

        if !verifier.verify(&init.credential).await? || !verifier.issuer_trusted(init.credential.issuer).await? {
            return Err(Error::InvalidCredential("remote credential failed verification".into()));
        }

        let handshake_keys = KeySet::derive(Generation::Handshake, &init.challenge, false);
        let server_challenge = random_challenge();

        let mut conn = Connection {
            is_client: false,
            local_cid,
            remote_cid: Some(remote_cid),
            state: ConnectionState::Initial,
            local_vc: local_vc.clone(),
            remote_vc: Some(init.credential.clone()),
            local_challenge: server_challenge,
            remote_challenge: Some(init.challenge),
            initial_keys: Some(initial_keys),
            handshake_keys: Some(handshake_keys.clone()),
            application_keys: None,
            send_packet_number: 0,
            replay: ReplayWindow::new(),
            decryption_failures: 0,
            handshake_started_at_millis: now_millis,
            last_activity_millis: now_millis,
        };

        let app_keys = KeySet::derive(
            Generation::Application,
            &application_info(&init.challenge, &server_challenge, &local_vc.public_key, &init.credential.public_key),
            false,
        );
        conn.application_keys = Some(app_keys);
        conn.state = ConnectionState::Handshake;

        let response = VcResponsePayload {
            credential: local_vc,
            challenge: server_challenge,
            ack_challenge: init.challenge,
            timestamp: now_millis,
        };
        let frame = Frame::new(FrameType::VcResponse, serde_json::to_vec(&response)?);
        let packet = conn.seal_packet(PacketType::Handshake, handshake_keys, &[frame]);
        Ok((conn, packet))
    }

    /// Feeds one inbound raw packet to the connection and returns
    /// whatever outbound bytes or application-visible events it produces.
    pub async fn handle_packet(
        &mut self,
        raw: &[u8],
        verifier: &dyn CredentialVerifier,
        now_millis: i64,
    ) -> Result<Vec<ConnectionEvent>> {
        if self.state == ConnectionState::Closed {
            return Err(Error::Closed("connection already closed".into()));
        }
        let (header, header_len) = PacketHeader::decode(raw)?;
        let aad = &raw[..header_len];
        let frame_region = &raw[header_len..];

        match header.packet_type {
            PacketType::Handshake if self.is_client && self.state == ConnectionState::Initial => {
                self.handle_handshake_response(header, aad, frame_region, now_millis)
            }
            PacketType::Protected => self.handle_protected(header, aad, frame_region, now_millis).await,
            PacketType::Initial | PacketType::Handshake | PacketType::Retry => {
                // §8 Testable Property 7: a PROTECTED packet in Initial/Handshake
                // state is dropped; the converse (handshake-type packets once
                // already Established) is equally not meaningful, so both are
                // no-ops rather than errors — a slow/duplicate peer packet,
                // not an attack on its own.
                Ok(vec![])
            }
        }
        .map(|events| {
            self.last_activity_millis = now_millis;
            events
        })
    }

    fn handle_handshake_response(
        &mut self,
        header: PacketHeader,
        aad: &[u8],
        frame_region: &[u8],
        now_millis: i64,
    ) -> Result<Vec<ConnectionEvent>> {
        // Client derives its own copy using only material it already
        // possesses (its own challenge) — never the still-encrypted
        // payload — so decrypting this packet needs no prior exchange.
        let handshake_keys = KeySet::derive(Generation::Handshake, &self.local_challenge, true);
        let plaintext = handshake_keys.open(0, aad, frame_region);
        let plaintext = match plaintext {
            Ok(p) => p,
            Err(_) => return Err(self.close_on_decryption_failure()),
        };
        let frames = Frame::decode_all(&plaintext)?;
        let vc_response = frames
            .iter()
            .find(|f| f.frame_type == FrameType::VcResponse)
            .ok_or_else(|| Error::MalformedPacket("HANDSHAKE packet missing VC_RESPONSE frame".into()))?;
        let response: VcResponsePayload = serde_json::from_slice(&vc_response.payload)?;

        if response.ack_challenge != self.local_challenge {
            return Err(Error::InvalidCredential("ack_challenge does not match our challenge".into()));
        }

        self.remote_cid = Some(header.scid);
        self.remote_vc = Some(response.credential.clone());
        self.remote_challenge = Some(response.challenge);

        let app_keys = KeySet::derive(
            Generation::Application,
            &application_info(&self.local_challenge, &response.challenge, &self.local_vc.public_key, &response.credential.public_key),
            true,
        );
        self.application_keys = Some(app_keys.clone());
        self.state = ConnectionState::Established;

        let ack = VcAckPayload {
            ack_challenge: response.challenge,
        };
        let frame = Frame::new(FrameType::VcAck, serde_json::to_vec(&ack)?);
        let packet = self.seal_packet(PacketType::Protected, app_keys, &[frame]);
        self.last_activity_millis = now_millis;
        Ok(vec![ConnectionEvent::Send(packet), ConnectionEvent::HandshakeComplete])
    }

    async fn handle_protected(
        &mut self,
        header: PacketHeader,
        aad: &[u8],
        frame_region: &[u8],
        now_millis: i64,
    ) -> Result<Vec<ConnectionEvent>> {
        if self.state != ConnectionState::Established && self.state != ConnectionState::Handshake {
            // Testable property 7: drop PROTECTED packets before the
            // credential is verified (states Initial/Handshake on the
            // client side before it has derived application keys).
            if self.application_keys.is_none() {
                return Ok(vec![]);
            }
        }
        let Some(keys) = self.application_keys.clone() else {
            return Ok(vec![]);
        };
        let pn = reconstruct_packet_number(header.truncated_packet_number, self.replay.highest_received);
        if let Err(e) = self.replay.accept(pn, self.state != ConnectionState::Established) {
            tracing::warn!(packet_number = pn, "dropping replayed packet");
            return Err(e);
        }

        let plaintext = match keys.open(pn, aad, frame_region) {
            Ok(p) => {
                self.decryption_failures = 0;
                p
            }
            Err(_) => return Err(self.close_on_decryption_failure()),
        };
        let frames = Frame::decode_all(&plaintext)?;

        let was_handshake = self.state == ConnectionState::Handshake;
        let mut events = Vec::new();
        let mut application_frames = Vec::new();
        for frame in frames {
            match frame.frame_type {
                FrameType::VcAck => {
                    if was_handshake {
                        self.state = ConnectionState::Established;
                        events.push(ConnectionEvent::HandshakeComplete);
                    }
                }
                FrameType::Close => {
                    self.state = ConnectionState::Closed;
                    events.push(ConnectionEvent::Closed(CloseReason::PeerClosed));
                }
                _ => application_frames.push(frame),
            }
        }
        if !application_frames.is_empty() {
            events.push(ConnectionEvent::Frames(application_frames));
        }
        let _ = now_millis;
        Ok(events)
    }

    fn close_on_decryption_failure(&mut self) -> Error {
        self.decryption_failures += 1;
        if self.decryption_failures >= DECRYPTION_FAILURE_THRESHOLD {
            self.state = ConnectionState::Closed;
        }
        Error::DecryptionFailure
    }

    /// Builds a `Protected` packet carrying `frames`, using the
    /// established application keys. Errors if the handshake hasn't
    /// completed.
    pub fn seal_application_frames(&mut self, frames: &[Frame]) -> Result<Vec<u8>> {
        if self.state != ConnectionState::Established {
            return Err(Error::Closed("handshake not complete".into()));
        }
        let keys = self.application_keys.clone().expect("established implies application keys");
        Ok(self.seal_packet(PacketType::Protected, keys, frames))
    }

    pub fn build_heartbeat_packet(&mut self) -> Result<Vec<u8>> {
        self.seal_application_frames(&[Frame::new(FrameType::Heartbeat, vec![])])
    }

    pub fn build_close_packet(&mut self, reason: CloseReason) -> Result<Vec<u8>> {
        self.state = ConnectionState::Closing;
        let packet = if self.application_keys.is_some() {
            self.seal_application_frames(&[Frame::new(FrameType::Close, reason.to_string().into_bytes())])
        } else {
            Ok(Vec::new())
        };
        self.state = ConnectionState::Closed;
        packet
    }

    fn seal_packet(&mut self, packet_type: PacketType, keys: KeySet, frames: &[Frame]) -> Vec<u8> {
        let pn = self.send_packet_number;
        self.send_packet_number += 1;
        let header = PacketHeader {
            packet_type,
            version: VERSION,
            dcid: self.remote_cid.unwrap_or(self.local_cid),
            scid: self.local_cid,
            truncated_packet_number: (pn & 0xFF) as u8,
        };
        let header_bytes = header.encode();
        let plaintext = Frame::encode_all(frames).expect("frames within size limit");
        let ciphertext = keys.seal(pn, &header_bytes, &plaintext).expect("key material is valid");
        let mut packet = header_bytes;
        packet.extend_from_slice(&ciphertext);
        packet
    }

    pub fn is_idle_timed_out(&self, now_millis: i64) -> bool {
        now_millis - self.last_activity_millis >= (IDLE_TIMEOUT_SECS as i64) * 1000
    }

    pub fn is_handshake_timed_out(&self, now_millis: i64) -> bool {
        self.state != ConnectionState::Established
            && self.state != ConnectionState::Closed
            && now_millis - self.handshake_started_at_millis >= (HANDSHAKE_TIMEOUT_SECS as i64) * 1000
    }

    pub fn remote_credential(&self) -> Option<&VerifiableCredential> {
        self.remote_vc.as_ref()
    }

    pub fn note_activity(&mut self, now_millis: i64) {
        self.last_activity_millis = now_millis;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chum_types::Hash;

    struct AllowAll;

    #[async_trait]
    impl CredentialVerifier for AllowAll {
        async fn verify(&self, _vc: &VerifiableCredential) -> Result<bool> {
            Ok(true)
        }
        async fn issuer_trusted(&self, _issuer: chum_types::PersonId) -> Result<bool> {
            Ok(true)
        }
    }

    struct RejectAll;

    #[async_trait]
    impl CredentialVerifier for RejectAll {
        async fn verify(&self, _vc: &VerifiableCredential) -> Result<bool> {
            Ok(false)
        }
        async fn issuer_trusted(&self, _issuer: chum_types::PersonId) -> Result<bool> {
            Ok(false)
        }
    }

    fn fake_vc(seed: &str) -> VerifiableCredential {
        VerifiableCredential {
            issuer: Hash::of(seed.as_bytes()),
            subject: Hash::of(seed.as_bytes()),
            instance_id: Hash::of(seed.as_bytes()),
            public_key: seed.as_bytes().to_vec(),
            capabilities: vec!["sync".into()],
            issued_at: 0,
            expires_at: i64::MAX / 2,
            signature: vec![],
        }
    }

    #[tokio::test]
    async fn full_handshake_reaches_established_on_both_sides() {
        let (mut client, initial_packet) = Connection::initiate(fake_vc("client"), 0);
        let (mut server, handshake_packet) =
            Connection::accept(&initial_packet, fake_vc("server"), &AllowAll, 0).await.unwrap();
        assert_eq!(server.state, ConnectionState::Handshake);

        let client_events = client.handle_packet(&handshake_packet, &AllowAll, 10).await.unwrap();
        assert_eq!(client.state, ConnectionState::Established);
        let ack_packet = client_events
            .into_iter()
            .find_map(|e| match e {
                ConnectionEvent::Send(bytes) => Some(bytes),
                _ => None,
            })
            .expect("client emits a VC_ACK packet");

        let server_events = server.handle_packet(&ack_packet, &AllowAll, 20).await.unwrap();
        assert_eq!(server.state, ConnectionState::Established);
        assert!(server_events.iter().any(|e| matches!(e, ConnectionEvent::HandshakeComplete)));
    }

    #[tokio::test]
    async fn untrusted_credential_rejects_handshake() {
        let (_client, initial_packet) = Connection::initiate(fake_vc("client"), 0);
        let err = Connection::accept(&initial_packet, fake_vc("server"), &RejectAll, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn protected_packet_before_handshake_is_dropped() {
        let (mut client, _initial_packet) = Connection::initiate(fake_vc("client"), 0);
        // A PROTECTED packet forged before any key exchange: garbage
        // header, but still structurally a valid PROTECTED packet.
        let header = PacketHeader {
            packet_type: PacketType::Protected,
            version: VERSION,
            dcid: client.local_cid,
            scid: ConnectionId::random(),
            truncated_packet_number: 0,
        };
        let mut raw = header.encode();
        raw.extend_from_slice(&[0u8; 16]);
        let events = client.handle_packet(&raw, &AllowAll, 0).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(client.state, ConnectionState::Initial);
    }

    #[tokio::test]
    async fn replayed_application_packet_is_rejected() {
        let (mut client, initial_packet) = Connection::initiate(fake_vc("client"), 0);
        let (mut server, handshake_packet) =
            Connection::accept(&initial_packet, fake_vc("server"), &AllowAll, 0).await.unwrap();
        let client_events = client.handle_packet(&handshake_packet, &AllowAll, 10).await.unwrap();
        let ack_packet = client_events
            .into_iter()
            .find_map(|e| match e {
                ConnectionEvent::Send(bytes) => Some(bytes),
                _ => None,
            })
            .unwrap();
        server.handle_packet(&ack_packet, &AllowAll, 20).await.unwrap();

        let data_packet = client
            .seal_application_frames(&[Frame::new(FrameType::Stream, b"hi".to_vec())])
            .unwrap();
        let first = server.handle_packet(&data_packet, &AllowAll, 30).await.unwrap();
        assert!(first.iter().any(|e| matches!(e, ConnectionEvent::Frames(_))));

        let replay_result = server.handle_packet(&data_packet, &AllowAll, 40).await;
        assert!(matches!(replay_result, Err(Error::Replayed(_))));
    }
}
