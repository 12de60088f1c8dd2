//! Command-line surface: config path and per-field overrides in the
//! shuttle tool's merge style, plus subcommands exercising the S1-S3
//! scenarios end to end.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(name = "chum-node")]
pub struct Opt {
    /// Path to the TOML config file. Defaults to `$base_dir/chum.toml`
    /// if unset and the default base dir exists, otherwise built-in
    /// defaults.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Overrides `storage.base_dir`.
    #[clap(long)]
    pub base_dir: Option<PathBuf>,

    /// Overrides `transport.bind_addr`.
    #[clap(long)]
    pub transport_bind: Option<SocketAddr>,

    /// Overrides `discovery.bind_addr`.
    #[clap(long)]
    pub discovery_bind: Option<SocketAddr>,

    /// Overrides `discovery.broadcast_addr`.
    #[clap(long)]
    pub discovery_broadcast: Option<SocketAddr>,

    /// Overrides `instance.name`.
    #[clap(long)]
    pub name: Option<String>,

    /// Overrides `instance.owner_email`. Required on first run at a
    /// given `base_dir` since it seeds the local Person.
    #[clap(long)]
    pub owner_email: Option<String>,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bootstraps and idles, driving discovery/transport/sync in the
    /// background until interrupted. The default when no subcommand is
    /// given.
    Run,

    /// Prints this instance's person id and bootstrap status, then
    /// exits (spec §8 smoke-test entry point).
    Status,

    /// Issues a one-time invitation for another instance to pair with
    /// (S3).
    CreateInvitation {
        /// Address (host:port) the invited peer should connect back to,
        /// recorded in the invitation for display purposes only.
        #[clap(long)]
        instance_endpoint: String,
        #[clap(long, default_value_t = 300_000)]
        ttl_millis: i64,
    },

    /// Connects to a peer and consumes an invitation token it issued
    /// out of band (S3).
    Pair {
        #[clap(long)]
        peer_addr: SocketAddr,
        /// Invitation printed by `create-invitation` on the other side,
        /// as a JSON object.
        #[clap(long)]
        invitation_json: String,
    },

    /// Creates a group topic with the given participant person ids (hex)
    /// and posts one message to it (S2).
    CreateGroupTopic {
        #[clap(long)]
        name: String,
        #[clap(long)]
        topic_id: String,
        #[clap(long, value_delimiter = ',')]
        participants: Vec<String>,
    },

    /// Appends a message to an existing topic as this instance's person
    /// (S1/S2).
    SendMessage {
        #[clap(long)]
        topic_id: String,
        #[clap(long)]
        text: String,
    },

    /// Registers (if needed) an AI persona person and appends its reply
    /// to the last messages on a topic (S2).
    AskPersona {
        #[clap(long)]
        topic_id: String,
        #[clap(long, default_value = "persona@chum.local")]
        persona_email: String,
        #[clap(long, default_value = "echo-1")]
        model_id: String,
    },
}
