//! Application state: the explicit dependency container handed to every handler.
//!
//! This module owns:
//!   - the persistence collaborator (`DataStore`)
//!   - the vector store facade (in-process index + optional remote index)
//!   - the generation client (provider chain + fallback)
//!   - the open-stream registry used for coordinated shutdown
//!   - tuning constants loaded from TOML or defaults

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::{DocumentCfg, Settings, Tuning};
use crate::domain::Chunk;
use crate::embeddings::Embedder;
use crate::generation::GenerationClient;
use crate::sse_registry::ConnectionRegistry;
use crate::store::{DataStore, InMemoryStore};
use crate::vector_store::{ChromaIndex, VectorStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DataStore>,
    pub vectors: Arc<VectorStore>,
    pub llm: Arc<GenerationClient>,
    pub streams: ConnectionRegistry,
    pub tuning: Tuning,
}

impl AppState {
    /// Build state from settings: in-memory store, vector store (remote when
    /// CHROMA_URL is set), generation providers with credentials.
    #[instrument(level = "info", skip_all)]
    pub fn new(settings: &Settings) -> Self {
        let embedder = Embedder::new();
        let vectors = match &settings.remote_index {
            Some(remote) => match ChromaIndex::new(remote, settings.remote_timeout, embedder) {
                Ok(index) => {
                    info!(target: "retrieval", url = %remote.url, collection = %remote.collection, "Remote vector index enabled.");
                    VectorStore::with_remote(embedder, Arc::new(index))
                }
                Err(e) => {
                    warn!(target: "retrieval", error = %e, "Remote vector index client could not be built; in-process index only");
                    VectorStore::in_memory(embedder)
                }
            },
            None => {
                info!(target: "retrieval", "Remote vector index disabled (no CHROMA_URL). Using in-process index.");
                VectorStore::in_memory(embedder)
            }
        };

        Self::from_parts(
            Arc::new(InMemoryStore::new()),
            Arc::new(vectors),
            Arc::new(GenerationClient::from_settings(settings)),
            settings.tuning.clone(),
        )
    }

    pub fn from_parts(
        store: Arc<dyn DataStore>,
        vectors: Arc<VectorStore>,
        llm: Arc<GenerationClient>,
        tuning: Tuning,
    ) -> Self {
        Self { store, vectors, llm, streams: ConnectionRegistry::new(), tuning }
    }

    /// Load the configured seed corpus into the vector store.
    #[instrument(level = "info", skip(self, documents), fields(count = documents.len()))]
    pub async fn seed_documents(&self, documents: &[DocumentCfg]) {
        if documents.is_empty() {
            return;
        }
        let chunks: Vec<Chunk> = documents.iter().map(DocumentCfg::to_chunk).collect();
        self.vectors.upsert(&chunks).await;
        info!(target: "sop_trainer", seeded = chunks.len(), local_chunks = self.vectors.local_len().await, "Seed corpus loaded");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared fixtures: state with no providers and no remote index, so every
    //! flow runs on deterministic fallback content.

    use super::*;
    use crate::config::Prompts;
    use crate::domain::User;
    use uuid::Uuid;

    pub fn offline_state() -> AppState {
        let mut tuning = Tuning::default();
        tuning.token_delay_ms = 0;
        AppState::from_parts(
            Arc::new(InMemoryStore::new()),
            Arc::new(VectorStore::in_memory(Embedder::new())),
            Arc::new(GenerationClient::new(Vec::new(), Prompts::default())),
            tuning,
        )
    }

    pub async fn learner(state: &AppState) -> User {
        state.store.get_or_create_user(Uuid::new_v4(), "en").await.expect("user")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::offline_state;
    use super::*;

    #[tokio::test]
    async fn seed_documents_land_in_local_index() {
        let state = offline_state();
        let docs = vec![DocumentCfg {
            id: "ppe-1".into(),
            text: "Wear safety glasses at the press line.".into(),
            module: "Safety Basics".into(),
            source: None,
        }];
        state.seed_documents(&docs).await;
        assert_eq!(state.vectors.local_len().await, 1);
    }
}
