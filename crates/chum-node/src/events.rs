//! Collaborator contracts (spec §6): the core never calls back into the
//! UI synchronously, and the AI persona layer calls an injected LLM
//! runtime rather than embedding one. `chum-node` ships minimal
//! implementations of both so the CLI smoke test can exercise every
//! event and the S2 scenario without an external process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{mpsc, RwLock};

/// Events the UI/shell layer receives. The core only ever pushes onto
/// this channel; nothing in the core blocks on a UI response.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    MessageUpdated { topic_id: String, entry_hash: String },
    MessageStream { topic_id: String, token: String },
    PeerDiscovered { device_id: String },
    PeerConnected { device_id: String },
    PeerLost { device_id: String },
    ContactAdded { person: String },
    PairingSuccess { peer: String },
}

#[derive(Clone)]
pub struct UiEventSink {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl UiEventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (UiEventSink { tx }, rx)
    }

    pub fn emit(&self, event: UiEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::trace!(?event, "ui event dropped, no listener");
        }
    }
}

/// A single chat turn passed to the LLM runtime.
#[derive(Debug, Clone)]
pub struct ChatMessageTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

/// `chat`/`listModels` from the collaborator contract table. The AI
/// persona layer calls this on behalf of a Person the core has
/// registered; the core never initiates a call the other direction.
#[async_trait]
pub trait LlmRuntime: Send + Sync {
    async fn chat(&self, messages: &[ChatMessageTurn], model_id: &str, options: &serde_json::Value) -> anyhow::Result<String>;
    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>>;
}

/// Canned-response stand-in so the CLI smoke test can exercise S2
/// without a real model endpoint.
pub struct EchoPersonaRuntime;

#[async_trait]
impl LlmRuntime for EchoPersonaRuntime {
    async fn chat(&self, messages: &[ChatMessageTurn], _model_id: &str, _options: &serde_json::Value) -> anyhow::Result<String> {
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        Ok(format!("hi (re: {last})"))
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo { id: "echo-1".into(), name: "Echo persona".into() }])
    }
}

/// `get`/`set` from the collaborator contract table, used for
/// default-model selection and instance bootstrap.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<serde_json::Value>;
    async fn set(&self, key: &str, value: serde_json::Value);
}

/// Backed by a single JSON file under the storage directory — this is a
/// CLI node, not a shell with its own preference database.
pub struct FileSettingsStore {
    path: PathBuf,
    values: RwLock<HashMap<String, serde_json::Value>>,
}

impl FileSettingsStore {
    pub async fn open(path: PathBuf) -> anyhow::Result<Self> {
        let values = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        Ok(FileSettingsStore { path, values: RwLock::new(values) })
    }

    async fn persist(&self, values: &HashMap<String, serde_json::Value>) {
        match serde_json::to_vec_pretty(values) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&self.path, bytes).await {
                    tracing::warn!(error = %e, "failed to persist settings store");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize settings store"),
        }
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: serde_json::Value) {
        let mut values = self.values.write().await;
        values.insert(key.to_string(), value);
        self.persist(&values).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_persona_replies_to_the_last_message() {
        let runtime = EchoPersonaRuntime;
        let reply = runtime
            .chat(&[ChatMessageTurn { role: "user".into(), content: "hello".into() }], "echo-1", &serde_json::json!({}))
            .await
            .unwrap();
        assert!(reply.contains("hello"));
    }

    #[tokio::test]
    async fn settings_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = FileSettingsStore::open(path.clone()).await.unwrap();
        assert!(store.get("default_model").await.is_none());
        store.set("default_model", serde_json::json!("echo-1")).await;

        let reopened = FileSettingsStore::open(path).await.unwrap();
        assert_eq!(reopened.get("default_model").await, Some(serde_json::json!("echo-1")));
    }

    #[tokio::test]
    async fn ui_event_sink_does_not_panic_with_no_receiver() {
        let (sink, rx) = UiEventSink::channel();
        drop(rx);
        sink.emit(UiEvent::PeerDiscovered { device_id: "x".into() });
    }
}
