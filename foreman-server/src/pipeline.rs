//! Command pipeline — transcript in, composed reply out
//!
//! One `Engine` instance owns the subsystems and is passed by reference
//! into every request path; there is no global coordinator state. The flow
//! per command: extract → resolve asset → (retrieve memory) → orchestrate
//! or navigate → compose. Every per-command error is converted into a
//! spoken reply here; the session always keeps a valid state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use foreman_core::config::ForemanConfig;
use foreman_core::embeddings::{EmbeddingBackend, FallbackEmbeddingClient};
use foreman_core::error::PipelineError;
use foreman_core::ipc::{VoiceRequest, VoiceResponse};
use foreman_core::models::{Command, MemoryRecord, Reply, Session, SessionState};
use foreman_core::providers::{build_ranked_providers, ProviderAdapter};
use foreman_core::storage::{KvStore, MemoryKvStore, SledKvStore};

use crate::session::SessionRegistry;
use crate::subsystems::assets::{AssetDirectory, HttpAssetDirectory};
use crate::subsystems::compose;
use crate::subsystems::extract::IntentGrammar;
use crate::subsystems::memory::{spawn_memory_write, MemoryStore};
use crate::subsystems::orchestrate::{run_provider_race, Orchestrated};
use crate::subsystems::procedure::{self, NavOutcome, ProcedureLibrary};

pub struct Engine {
    pub config: ForemanConfig,
    pub sessions: Arc<SessionRegistry>,
    pub memory: Arc<MemoryStore>,
    pub storage: Arc<dyn KvStore>,
    grammar: IntentGrammar,
    procedures: ProcedureLibrary,
    providers: Vec<Arc<dyn ProviderAdapter>>,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    assets: Option<Arc<dyn AssetDirectory>>,
}

impl Engine {
    /// Build the engine from configuration. Missing provider or embedding
    /// credentials degrade the respective path instead of failing startup.
    pub fn from_config(config: ForemanConfig) -> anyhow::Result<Self> {
        let storage: Arc<dyn KvStore> = match &config.storage.data_dir {
            Some(dir) => Arc::new(SledKvStore::open(dir)?),
            None => Arc::new(MemoryKvStore::new()),
        };

        let embedder: Option<Arc<dyn EmbeddingBackend>> =
            match FallbackEmbeddingClient::new(&config.embedding) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::warn!(error = %e, "No embedding backend — memory enrichment disabled");
                    None
                }
            };

        let assets: Option<Arc<dyn AssetDirectory>> = match &config.assets.base_url {
            Some(base_url) => Some(Arc::new(HttpAssetDirectory::new(base_url.clone())?)),
            None => None,
        };

        let providers = build_ranked_providers(&config.orchestrator.providers);
        if providers.is_empty() {
            tracing::warn!("No usable providers — generative commands will be unavailable");
        }

        Ok(Self {
            grammar: IntentGrammar::new(&config.extractor),
            sessions: Arc::new(SessionRegistry::new()),
            memory: Arc::new(MemoryStore::new(config.memory.clone())),
            procedures: ProcedureLibrary::with_builtin_catalog(),
            providers,
            embedder,
            assets,
            storage,
            config,
        })
    }

    /// Assemble an engine from explicit parts. Used by embedding hosts and
    /// the integration tests, which inject scripted collaborators.
    pub fn with_parts(
        config: ForemanConfig,
        providers: Vec<Arc<dyn ProviderAdapter>>,
        embedder: Option<Arc<dyn EmbeddingBackend>>,
        assets: Option<Arc<dyn AssetDirectory>>,
        storage: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            grammar: IntentGrammar::new(&config.extractor),
            sessions: Arc::new(SessionRegistry::new()),
            memory: Arc::new(MemoryStore::new(config.memory.clone())),
            procedures: ProcedureLibrary::with_builtin_catalog(),
            providers,
            embedder,
            assets,
            storage,
            config,
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Single dispatch point for both the IPC and HTTP surfaces.
    pub async fn handle_request(&self, request: VoiceRequest) -> VoiceResponse {
        match request {
            VoiceRequest::Ping => VoiceResponse::pong(),
            VoiceRequest::Health => VoiceResponse::ok(json!({
                "status": "healthy",
                "sessions": self.sessions.len(),
                "memory_records": self.memory.len(),
                "providers": self.provider_names(),
            })),
            VoiceRequest::Command {
                session_id,
                transcript,
                confidence,
            } => self.handle_command(session_id, transcript, confidence).await,
            VoiceRequest::Search {
                query,
                limit,
                asset_id,
            } => match self.handle_search(query, limit, asset_id).await {
                Ok(data) => VoiceResponse::ok(data),
                Err(e) => VoiceResponse::err(e.to_string()),
            },
            VoiceRequest::CloseSession { session_id } => {
                if self.sessions.archive(session_id, self.storage.as_ref()).await {
                    VoiceResponse::ok(json!({"closed": true, "session_id": session_id}))
                } else {
                    VoiceResponse::err(format!("Unknown session {}", session_id))
                }
            }
        }
    }

    async fn handle_command(
        &self,
        session_id: Option<Uuid>,
        transcript: String,
        recognizer_confidence: Option<f32>,
    ) -> VoiceResponse {
        let handle = self.sessions.get_or_create(session_id);
        // Exclusive ownership of the session for this whole command; the
        // queue-fair mutex keeps commands in arrival order.
        let mut session = handle.inner.lock().await;

        if session.state == SessionState::Closed {
            return VoiceResponse::err(format!("Session {} is closed", handle.id));
        }

        let deadline = Duration::from_millis(self.config.orchestrator.pipeline_deadline_ms);
        let reply = match tokio::time::timeout(
            deadline,
            self.process_command(&mut session, &transcript, recognizer_confidence),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => {
                tracing::error!(session = %handle.id, "Pipeline deadline exceeded");
                compose::compose_error_reply(&PipelineError::ServiceUnavailable)
            }
        };

        match serde_json::to_value(&reply) {
            Ok(reply_json) => VoiceResponse::ok(json!({
                "session_id": handle.id,
                "state": session.state,
                "reply": reply_json,
            })),
            Err(e) => VoiceResponse::err(format!("Reply serialization failed: {}", e)),
        }
    }

    async fn process_command(
        &self,
        session: &mut Session,
        transcript: &str,
        recognizer_confidence: Option<f32>,
    ) -> Reply {
        let command = match self
            .grammar
            .extract(transcript, session.id, recognizer_confidence)
        {
            Ok(command) => command,
            Err(e) => return compose::compose_error_reply(&e),
        };

        tracing::info!(
            session = %session.id,
            intent = %command.intent,
            confidence = command.confidence,
            "Command extracted"
        );

        session.record(foreman_core::models::SessionEvent::Command {
            intent: command.intent,
            transcript: command.transcript.clone(),
        });
        session.touch();

        self.resolve_asset(session, &command).await;

        use foreman_core::models::Intent;
        match command.intent {
            intent if intent.is_navigation() || intent == Intent::CloseSession => {
                // Gate before the state machine runs: a doubtful
                // navigation must not advance procedure state.
                if command.confidence < self.config.composer.clarification_threshold {
                    return compose::compose_error_reply(
                        &PipelineError::RecognitionLowConfidence {
                            confidence: command.confidence,
                        },
                    );
                }

                let result = procedure::navigate(
                    session,
                    command.intent,
                    &self.procedures,
                    command.entity("procedure_id"),
                );

                if let Ok(NavOutcome::Completed { summary, .. }) = &result {
                    self.remember(
                        summary.clone(),
                        session.asset.as_ref().map(|a| a.asset_id.clone()),
                        0.8,
                    );
                }

                compose::compose_navigation_reply(session.id, command.confidence, &result)
            }
            Intent::CreateTask => {
                let reply = compose::compose_action_reply(&command, &self.config.composer);
                if reply.action.is_some() {
                    self.remember(
                        command.transcript.clone(),
                        command.entity("asset_id").map(str::to_string),
                        0.7,
                    );
                }
                reply
            }
            _ => {
                let context = self.retrieve_context(&command).await;
                let prompt = compose::build_prompt(&command, &context, session.asset.as_ref());

                let orchestrated =
                    run_provider_race(&prompt, &self.providers, &self.config.orchestrator).await;

                let reply = compose::compose_generative_reply(&orchestrated, &self.config.composer);

                if let Orchestrated::Answer(result) = &orchestrated {
                    if !reply.clarification {
                        self.remember(
                            format!("Asked: {} — Answer: {}", command.transcript, result.text),
                            command.entity("asset_id").map(str::to_string),
                            0.5,
                        );
                    }
                }

                reply
            }
        }
    }

    /// Resolve and cache the asset descriptor for the session's lifetime.
    /// Failures degrade to proceeding without asset context.
    async fn resolve_asset(&self, session: &mut Session, command: &Command) {
        let Some(asset_id) = command.entity("asset_id") else {
            return;
        };
        if session
            .asset
            .as_ref()
            .is_some_and(|a| a.asset_id == asset_id)
        {
            return;
        }
        let Some(directory) = &self.assets else {
            return;
        };

        match directory.lookup(asset_id).await {
            Ok(Some(descriptor)) => {
                tracing::debug!(session = %session.id, asset = %asset_id, "Asset resolved");
                session.asset = Some(descriptor);
            }
            Ok(None) => {
                tracing::debug!(asset = %asset_id, "Asset not found in directory");
            }
            Err(e) => {
                tracing::warn!(asset = %asset_id, error = %e, "Asset lookup failed");
            }
        }
    }

    /// Best-effort memory retrieval; any failure degrades to an empty
    /// context rather than failing the command.
    async fn retrieve_context(&self, command: &Command) -> Vec<Arc<MemoryRecord>> {
        let Some(embedder) = &self.embedder else {
            return Vec::new();
        };

        match embedder.embed(&command.transcript).await {
            Ok(Some(query)) => self
                .memory
                .retrieve(
                    &query,
                    self.config.memory.retrieve_top_k as usize,
                    command.entity("asset_id"),
                )
                .into_iter()
                .map(|scored| scored.record)
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => {
                let err = PipelineError::MemoryStore(e.to_string());
                tracing::warn!(error = %err, "Proceeding without memory context");
                Vec::new()
            }
        }
    }

    fn remember(&self, text: String, asset_id: Option<String>, importance: f32) {
        spawn_memory_write(
            Arc::clone(&self.memory),
            self.embedder.clone(),
            Arc::clone(&self.storage),
            text,
            asset_id,
            importance,
        );
    }

    async fn handle_search(
        &self,
        query: String,
        limit: Option<u32>,
        asset_id: Option<String>,
    ) -> anyhow::Result<serde_json::Value> {
        let query = query.trim().to_string();
        if query.is_empty() {
            anyhow::bail!("Query cannot be empty");
        }

        let Some(embedder) = &self.embedder else {
            anyhow::bail!("No embedding backend configured — search requires one");
        };

        let query_embedding = match embedder.embed(&query).await {
            Ok(Some(v)) => v,
            Ok(None) => anyhow::bail!("Embedding unavailable — search requires a working backend"),
            Err(e) => anyhow::bail!("Failed to embed query: {}", e),
        };

        let k = limit.unwrap_or(self.config.memory.retrieve_top_k) as usize;
        let results = self.memory.retrieve(&query_embedding, k, asset_id.as_deref());

        let items: Vec<serde_json::Value> = results
            .iter()
            .map(|scored| {
                json!({
                    "id": scored.record.id,
                    "text": scored.record.text,
                    "asset_id": scored.record.asset_id,
                    "score": scored.score,
                    "importance": scored.record.importance,
                    "created_at": scored.record.created_at,
                })
            })
            .collect();

        Ok(json!({
            "results": items,
            "query": query,
            "count": items.len(),
        }))
    }
}
