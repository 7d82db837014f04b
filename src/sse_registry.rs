//! Process-wide registry of open event streams.
//!
//! Every delivery task registers itself and holds the returned guard for as
//! long as it is writing. Shutdown cancels the root token, which cancels
//! every registered stream (and any stream registered afterwards).

use std::{
  collections::HashSet,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
  },
};

use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Default)]
struct Inner {
  open: Mutex<HashSet<u64>>,
  next_id: AtomicU64,
  root: CancellationToken,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
  inner: Arc<Inner>,
}

/// Deregisters its stream when dropped.
pub struct StreamGuard {
  id: u64,
  token: CancellationToken,
  inner: Arc<Inner>,
}

impl StreamGuard {
  pub fn token(&self) -> CancellationToken {
    self.token.clone()
  }
}

impl Drop for StreamGuard {
  fn drop(&mut self) {
    lock(&self.inner.open).remove(&self.id);
    debug!(target: "chat", stream = self.id, "Stream deregistered");
  }
}

fn lock(m: &Mutex<HashSet<u64>>) -> MutexGuard<'_, HashSet<u64>> {
  m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ConnectionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self) -> StreamGuard {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    lock(&self.inner.open).insert(id);
    debug!(target: "chat", stream = id, "Stream registered");
    StreamGuard { id, token: self.inner.root.child_token(), inner: self.inner.clone() }
  }

  pub fn count(&self) -> usize {
    lock(&self.inner.open).len()
  }

  /// Cancel every open stream. Returns how many were open.
  pub fn close_all(&self) -> usize {
    let open = self.count();
    self.inner.root.cancel();
    open
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn guards_track_open_streams() {
    let reg = ConnectionRegistry::new();
    let a = reg.register();
    let b = reg.register();
    assert_eq!(reg.count(), 2);
    drop(a);
    assert_eq!(reg.count(), 1);
    drop(b);
    assert_eq!(reg.count(), 0);
  }

  #[test]
  fn close_all_cancels_current_and_future_streams() {
    let reg = ConnectionRegistry::new();
    let a = reg.register();
    let b = reg.register();
    assert_eq!(reg.close_all(), 2);
    assert!(a.token().is_cancelled());
    assert!(b.token().is_cancelled());

    let late = reg.register();
    assert!(late.token().is_cancelled());
  }
}
