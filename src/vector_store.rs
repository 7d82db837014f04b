//! Vector retrieval: an in-process brute-force index, a remote
//! (Chroma-compatible HTTP) index, and the `VectorStore` facade that composes
//! them so queries and upserts never hard-fail on infrastructure outages.
//!
//! Upserts always land in the in-process copy first and are then mirrored to
//! the remote index best-effort. Queries try the remote index and fall back to
//! the in-process copy on any failure (not yet initialized, network, timeout).

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::RemoteIndexSettings;
use crate::domain::{Chunk, RetrievedChunk};
use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::RetrievalError;

/// One similarity query. `top_k` is clamped to at least 1.
#[derive(Clone, Debug)]
pub struct VectorQuery {
  pub text: String,
  pub top_k: usize,
  pub module: Option<String>,
}

impl VectorQuery {
  pub fn new(text: impl Into<String>, top_k: usize, module: Option<String>) -> Self {
    Self { text: text.into(), top_k, module }
  }

  fn limit(&self) -> usize {
    self.top_k.max(1)
  }
}

/// Capability shared by every index backend.
#[async_trait]
pub trait VectorIndex: Send + Sync {
  async fn upsert(&self, chunks: &[Chunk]) -> Result<(), RetrievalError>;

  /// Results sorted by descending score, at most `query.top_k.max(1)` long.
  async fn query(&self, query: &VectorQuery) -> Result<Vec<RetrievedChunk>, RetrievalError>;

  /// Liveness probe. Backends without a remote side are always alive.
  async fn heartbeat(&self) -> Result<(), RetrievalError> {
    Ok(())
  }
}

struct IndexedChunk {
  chunk: Chunk,
  embedding: Vec<f32>,
}

/// Brute-force in-process index. Fine for corpora of a few thousand chunks.
pub struct InMemoryIndex {
  embedder: Embedder,
  chunks: RwLock<HashMap<String, IndexedChunk>>,
}

impl InMemoryIndex {
  pub fn new(embedder: Embedder) -> Self {
    Self { embedder, chunks: RwLock::new(HashMap::new()) }
  }

  pub async fn len(&self) -> usize {
    self.chunks.read().await.len()
  }

  pub async fn insert(&self, chunks: &[Chunk]) {
    // Embed outside the lock; readers only wait for the map swap-in.
    let indexed: Vec<IndexedChunk> = chunks
      .iter()
      .map(|c| IndexedChunk { chunk: c.clone(), embedding: self.embedder.embed(&c.text) })
      .collect();
    let mut map = self.chunks.write().await;
    for ic in indexed {
      map.insert(ic.chunk.id.clone(), ic);
    }
  }

  pub async fn search(&self, query: &VectorQuery) -> Vec<RetrievedChunk> {
    let q = self.embedder.embed(&query.text);
    let map = self.chunks.read().await;
    let mut scored: Vec<RetrievedChunk> = map
      .values()
      .filter(|ic| query.module.as_deref().map_or(true, |m| ic.chunk.module == m))
      .map(|ic| RetrievedChunk { chunk: ic.chunk.clone(), score: cosine_similarity(&q, &ic.embedding) })
      .collect();
    drop(map);

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(query.limit());
    scored
  }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
  async fn upsert(&self, chunks: &[Chunk]) -> Result<(), RetrievalError> {
    self.insert(chunks).await;
    Ok(())
  }

  async fn query(&self, query: &VectorQuery) -> Result<Vec<RetrievedChunk>, RetrievalError> {
    Ok(self.search(query).await)
  }
}

/// Remote collection spoken to over the Chroma v1 HTTP API. The collection id
/// is resolved lazily on first use and retried on later calls if that fails.
pub struct ChromaIndex {
  client: reqwest::Client,
  base_url: String,
  collection: String,
  timeout: Duration,
  embedder: Embedder,
  collection_id: OnceCell<String>,
}

impl ChromaIndex {
  pub fn new(settings: &RemoteIndexSettings, timeout: Duration, embedder: Embedder) -> Result<Self, RetrievalError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self {
      client,
      base_url: settings.url.trim_end_matches('/').to_string(),
      collection: settings.collection.clone(),
      timeout,
      embedder,
      collection_id: OnceCell::new(),
    })
  }

  async fn bounded<T, F>(&self, fut: F) -> Result<T, RetrievalError>
  where
    F: Future<Output = Result<T, RetrievalError>>,
  {
    match tokio::time::timeout(self.timeout, fut).await {
      Ok(res) => res,
      Err(_) => Err(RetrievalError::Timeout(self.timeout.as_millis() as u64)),
    }
  }

  async fn send_json<B: Serialize>(&self, url: &str, body: &B) -> Result<reqwest::Response, RetrievalError> {
    let res = self
      .client
      .post(url)
      .header(USER_AGENT, "sop-trainer-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .json(body)
      .send()
      .await?;
    if !res.status().is_success() {
      let status = res.status().as_u16();
      let message = res.text().await.unwrap_or_default();
      return Err(RetrievalError::Http { status, message });
    }
    Ok(res)
  }

  async fn post_json<B: Serialize, T: for<'a> Deserialize<'a>>(&self, url: &str, body: &B) -> Result<T, RetrievalError> {
    let res = self.send_json(url, body).await?;
    res.json::<T>().await.map_err(|e| RetrievalError::Decode(e.to_string()))
  }

  async fn collection_id(&self) -> Result<&str, RetrievalError> {
    let id = self
      .collection_id
      .get_or_try_init(|| async {
        #[derive(Deserialize)]
        struct Created {
          id: String,
        }
        let url = format!("{}/api/v1/collections", self.base_url);
        let body = serde_json::json!({
          "name": self.collection,
          "metadata": { "purpose": "sop_training_documents" },
          "get_or_create": true,
        });
        let created: Created = self.bounded(self.post_json(&url, &body)).await?;
        info!(target: "retrieval", collection = %self.collection, id = %created.id, "Remote collection ready");
        Ok::<String, RetrievalError>(created.id)
      })
      .await?;
    Ok(id.as_str())
  }
}

#[derive(Serialize)]
struct ChromaUpsert<'a> {
  ids: Vec<&'a str>,
  embeddings: Vec<Vec<f32>>,
  documents: Vec<&'a str>,
  metadatas: Vec<Map<String, Value>>,
}

#[derive(Serialize)]
struct ChromaQuery {
  query_embeddings: Vec<Vec<f32>>,
  n_results: usize,
  #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
  filter: Option<Value>,
  include: [&'static str; 3],
}

#[derive(Deserialize, Default)]
struct ChromaQueryResult {
  #[serde(default)]
  ids: Vec<Vec<String>>,
  #[serde(default)]
  documents: Option<Vec<Vec<Option<String>>>>,
  #[serde(default)]
  metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
  #[serde(default)]
  distances: Option<Vec<Vec<Option<f32>>>>,
}

impl ChromaQueryResult {
  /// Flatten the first result row into chunks; score = 1 / (1 + distance).
  fn into_chunks(self, default_module: Option<&str>) -> Vec<RetrievedChunk> {
    let ids = self.ids.into_iter().next().unwrap_or_default();
    let docs = self.documents.and_then(|d| d.into_iter().next()).unwrap_or_default();
    let metas = self.metadatas.and_then(|m| m.into_iter().next()).unwrap_or_default();
    let dists = self.distances.and_then(|d| d.into_iter().next()).unwrap_or_default();

    ids
      .into_iter()
      .enumerate()
      .map(|(i, id)| {
        let mut metadata = metas.get(i).cloned().flatten().unwrap_or_default();
        let module = metadata
          .remove("module")
          .and_then(|v| v.as_str().map(str::to_string))
          .or_else(|| default_module.map(str::to_string))
          .unwrap_or_else(|| "General Onboarding".into());
        let source = metadata
          .remove("source")
          .and_then(|v| v.as_str().map(str::to_string))
          .unwrap_or_else(|| "unknown".into());
        let score = match dists.get(i).copied().flatten() {
          Some(d) => 1.0 / (1.0 + d),
          None => 0.0,
        };
        RetrievedChunk {
          chunk: Chunk { id, text: docs.get(i).cloned().flatten().unwrap_or_default(), module, source, metadata },
          score,
        }
      })
      .collect()
  }
}

#[async_trait]
impl VectorIndex for ChromaIndex {
  #[instrument(level = "debug", skip(self, chunks), fields(count = chunks.len()))]
  async fn upsert(&self, chunks: &[Chunk]) -> Result<(), RetrievalError> {
    if chunks.is_empty() {
      return Ok(());
    }
    let id = self.collection_id().await?;
    let url = format!("{}/api/v1/collections/{}/upsert", self.base_url, id);
    let body = ChromaUpsert {
      ids: chunks.iter().map(|c| c.id.as_str()).collect(),
      embeddings: chunks.iter().map(|c| self.embedder.embed(&c.text)).collect(),
      documents: chunks.iter().map(|c| c.text.as_str()).collect(),
      metadatas: chunks
        .iter()
        .map(|c| {
          let mut m = c.metadata.clone();
          m.insert("module".into(), Value::String(c.module.clone()));
          m.insert("source".into(), Value::String(c.source.clone()));
          m
        })
        .collect(),
    };
    self.bounded(self.send_json(&url, &body)).await?;
    Ok(())
  }

  #[instrument(level = "debug", skip(self, query), fields(top_k = query.top_k, module = ?query.module))]
  async fn query(&self, query: &VectorQuery) -> Result<Vec<RetrievedChunk>, RetrievalError> {
    let id = self.collection_id().await?;
    let url = format!("{}/api/v1/collections/{}/query", self.base_url, id);
    let body = ChromaQuery {
      query_embeddings: vec![self.embedder.embed(&query.text)],
      n_results: query.limit(),
      filter: query.module.as_ref().map(|m| serde_json::json!({ "module": m })),
      include: ["documents", "metadatas", "distances"],
    };
    let raw: ChromaQueryResult = self.bounded(self.post_json(&url, &body)).await?;
    let mut out = raw.into_chunks(query.module.as_deref());
    out.sort_by(|a, b| b.score.total_cmp(&a.score));
    out.truncate(query.limit());
    Ok(out)
  }

  async fn heartbeat(&self) -> Result<(), RetrievalError> {
    let url = format!("{}/api/v1/heartbeat", self.base_url);
    self
      .bounded(async {
        let res = self.client.get(&url).send().await?;
        if res.status().is_success() {
          Ok(())
        } else {
          Err(RetrievalError::Http { status: res.status().as_u16(), message: "unexpected heartbeat status".into() })
        }
      })
      .await
  }
}

/// Composite store: a required in-process copy and an optional remote index.
pub struct VectorStore {
  fallback: InMemoryIndex,
  remote: Option<Arc<dyn VectorIndex>>,
}

impl VectorStore {
  pub fn in_memory(embedder: Embedder) -> Self {
    Self { fallback: InMemoryIndex::new(embedder), remote: None }
  }

  pub fn with_remote(embedder: Embedder, remote: Arc<dyn VectorIndex>) -> Self {
    Self { fallback: InMemoryIndex::new(embedder), remote: Some(remote) }
  }

  pub async fn local_len(&self) -> usize {
    self.fallback.len().await
  }

  /// Write to the in-process copy, then mirror to the remote index. Remote
  /// failures are logged and swallowed.
  #[instrument(level = "info", skip(self, chunks), fields(count = chunks.len()))]
  pub async fn upsert(&self, chunks: &[Chunk]) {
    self.fallback.insert(chunks).await;
    if let Some(remote) = &self.remote {
      if let Err(e) = remote.upsert(chunks).await {
        warn!(target: "retrieval", error = %e, category = ?e.category(), "Remote upsert failed; in-process copy kept");
      }
    }
  }

  /// Never fails: remote errors degrade to the in-process copy.
  #[instrument(level = "info", skip(self, query), fields(top_k = query.top_k, module = ?query.module, query_len = query.text.len()))]
  pub async fn query(&self, query: &VectorQuery) -> Vec<RetrievedChunk> {
    if let Some(remote) = &self.remote {
      match remote.query(query).await {
        Ok(hits) => {
          debug!(target: "retrieval", hits = hits.len(), "Served from remote index");
          return hits;
        }
        Err(e) => {
          warn!(target: "retrieval", error = %e, category = ?e.category(), "Retrieval degraded; serving from in-process index");
        }
      }
    }
    let hits = self.fallback.search(query).await;
    debug!(target: "retrieval", hits = hits.len(), "Served from in-process index");
    hits
  }

  /// Remote heartbeat, if a remote index is configured.
  pub async fn remote_heartbeat(&self) -> Option<Result<(), RetrievalError>> {
    match &self.remote {
      Some(remote) => Some(remote.heartbeat().await),
      None => None,
    }
  }
}
