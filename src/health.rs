//! Dependency health snapshot.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
  Ok,
  Degraded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyHealth {
  pub configured: bool,
  pub ok: bool,
  pub latency_ms: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependencies {
  pub vector_index: DependencyHealth,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
  pub status: HealthStatus,
  pub timestamp: DateTime<Utc>,
  pub dependencies: Dependencies,
  pub providers: Vec<String>,
  pub local_chunks: usize,
  pub open_streams: usize,
}

/// Ok when every configured dependency answered. The remote heartbeat is
/// bounded by the remote timeout.
pub async fn snapshot(state: &AppState) -> HealthSnapshot {
  let started = Instant::now();
  let vector_index = match state.vectors.remote_heartbeat().await {
    None => DependencyHealth { configured: false, ok: false, latency_ms: 0, error: None },
    Some(result) => DependencyHealth {
      configured: true,
      ok: result.is_ok(),
      latency_ms: started.elapsed().as_millis() as u64,
      error: result.err().map(|e| e.to_string()),
    },
  };

  let status = if [&vector_index].iter().filter(|d| d.configured).all(|d| d.ok) {
    HealthStatus::Ok
  } else {
    HealthStatus::Degraded
  };

  HealthSnapshot {
    status,
    timestamp: Utc::now(),
    dependencies: Dependencies { vector_index },
    providers: state.llm.provider_names(),
    local_chunks: state.vectors.local_len().await,
    open_streams: state.streams.count(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::state::test_support::offline_state;

  #[tokio::test]
  async fn unconfigured_dependencies_are_ok() {
    let state = offline_state();
    let snap = snapshot(&state).await;
    assert_eq!(snap.status, HealthStatus::Ok);
    assert!(!snap.dependencies.vector_index.configured);
    assert!(snap.providers.is_empty());

    let json = serde_json::to_value(&snap).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["dependencies"]["vectorIndex"].get("error").is_none());
  }
}
