//! Channel Manager, Topic & Group Manager, and Pairing: the topic/channel/
//! group model described in spec §4.8–§4.9.

pub mod channel_manager;
pub mod pairing;
pub mod topic_group_manager;

pub use channel_manager::{ChannelEvent, ChannelManager, MergedEntry, MergedMessage};
pub use pairing::{InvitationToken, PairingModule, PairingTransport};
pub use topic_group_manager::TopicGroupManager;
