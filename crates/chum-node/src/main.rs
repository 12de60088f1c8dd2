mod cli;
mod config;
mod events;
mod node;
mod status;

use anyhow::{Context, Result};
use chum_channel::InvitationToken;
use chum_types::PersonId;
use clap::Parser;
use cli::{Command, Opt};
use config::Config;
use events::{EchoPersonaRuntime, FileSettingsStore, LlmRuntime, SettingsStore};
use node::Node;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let opt = Opt::parse();
    let config = load_config(&opt)?;

    if config.instance.owner_email.is_empty() {
        anyhow::bail!("instance.owner_email must be set (via --owner-email or the config file) on first run");
    }

    tokio::fs::create_dir_all(&config.storage.base_dir).await.context("creating storage base dir")?;
    let settings_path = config.storage.base_dir.join("settings.json");
    let llm: Arc<dyn LlmRuntime> = Arc::new(EchoPersonaRuntime);
    let settings: Arc<dyn SettingsStore> = Arc::new(FileSettingsStore::open(settings_path).await.context("opening settings store")?);

    let (node, mut ui_rx) = Node::bootstrap(config, llm, settings).await.context("bootstrapping instance")?;
    tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            tracing::info!(?event, "ui event");
        }
    });

    tracing::info!(person = %node.self_person, "instance bootstrapped");

    match opt.command.unwrap_or(Command::Run) {
        Command::Run => {
            tracing::info!("running; Ctrl-C to exit");
            tokio::signal::ctrl_c().await?;
        }
        Command::Status => {
            println!("person: {}", node.self_person.to_hex());
            for (device_id, status) in node.peer_status.snapshot() {
                println!("peer {device_id}: {status:?}");
            }
        }
        Command::CreateInvitation { instance_endpoint, ttl_millis } => {
            let invitation = node.create_invitation(instance_endpoint, ttl_millis).await?;
            println!("{}", serde_json::to_string_pretty(&invitation)?);
        }
        Command::Pair { peer_addr, invitation_json } => {
            let invitation: InvitationToken = serde_json::from_str(&invitation_json)?;
            let peer_person = node.pair_with(peer_addr, &invitation).await?;
            println!("paired with {}", peer_person.to_hex());
        }
        Command::CreateGroupTopic { name, topic_id, participants } => {
            let participants: Vec<PersonId> =
                participants.iter().map(|p| PersonId::from_hex(p)).collect::<Result<_, _>>().context("parsing participant person id")?;
            let group_id = node.create_group_topic(&name, &topic_id, &participants).await?;
            println!("group {group_id} created for topic {topic_id}");
        }
        Command::SendMessage { topic_id, text } => {
            let entry_hash = node.send_message(&topic_id, node.self_person, &text).await?;
            println!("appended {entry_hash}");
        }
        Command::AskPersona { topic_id, persona_email, model_id } => {
            let persona = node.ensure_ai_persona(&persona_email).await?;
            let entry_hash = node.ai_persona_reply(&topic_id, persona, &model_id).await?;
            println!("persona {} replied at {entry_hash}", persona.to_hex());
        }
    }

    Ok(())
}

/// Merges the config file with CLI overrides, shuttle-style: a CLI flag
/// always wins, otherwise fall back to whatever the file (or its
/// defaults) says.
fn load_config(opt: &Opt) -> Result<Config> {
    let config_path = opt.config.clone().unwrap_or_else(|| PathBuf::from("chum.toml"));
    let mut config = Config::load_or_default(&config_path);

    if let Some(base_dir) = &opt.base_dir {
        config.storage.base_dir = base_dir.clone();
    }
    if let Some(bind_addr) = opt.transport_bind {
        config.transport.bind_addr = bind_addr;
    }
    if let Some(bind_addr) = opt.discovery_bind {
        config.discovery.bind_addr = bind_addr;
    }
    if let Some(broadcast_addr) = opt.discovery_broadcast {
        config.discovery.broadcast_addr = broadcast_addr;
    }
    if let Some(name) = &opt.name {
        config.instance.name = name.clone();
    }
    if let Some(owner_email) = &opt.owner_email {
        config.instance.owner_email = owner_email.clone();
    }

    Ok(config)
}
