//! Hashing-trick bag-of-words embeddings.
//!
//! Deterministic and dependency-free so that indexing and querying agree
//! without any network call. Tokens are lowercased ASCII alphanumeric runs
//! longer than one character; each token bumps slot `hash(token) mod DIM`,
//! and the histogram is scaled to unit L2 norm.

pub const DIM: usize = 256;

#[derive(Clone, Copy, Debug, Default)]
pub struct Embedder;

impl Embedder {
  pub fn new() -> Self {
    Self
  }

  /// Embed `text` into a unit vector, or the zero vector if it has no tokens.
  pub fn embed(&self, text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    let tokens = tokenize(text);
    if tokens.is_empty() {
      return v;
    }

    for tok in &tokens {
      v[(hash_token(tok) as usize) % DIM] += 1.0;
    }

    let norm = magnitude(&v);
    if norm == 0.0 {
      return v;
    }
    for x in v.iter_mut() {
      *x /= norm;
    }
    v
  }
}

fn tokenize(text: &str) -> Vec<String> {
  let lowered = text.to_lowercase();
  let cleaned: String = lowered
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
    .collect();
  cleaned
    .split_whitespace()
    .filter(|t| t.len() > 1)
    .map(str::to_string)
    .collect()
}

/// Polynomial rolling hash (base 31) over the token's UTF-16 units, wrapping at 32 bits.
fn hash_token(token: &str) -> u32 {
  token
    .encode_utf16()
    .fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as u32))
}

pub fn magnitude(v: &[f32]) -> f32 {
  v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity over the common prefix of both vectors.
/// Returns 0 when either side has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  let n = a.len().min(b.len());
  let mut dot = 0.0f32;
  let mut na = 0.0f32;
  let mut nb = 0.0f32;
  for i in 0..n {
    dot += a[i] * b[i];
    na += a[i] * a[i];
    nb += b[i] * b[i];
  }
  if na == 0.0 || nb == 0.0 {
    return 0.0;
  }
  dot / (na.sqrt() * nb.sqrt())
}

#[cfg(test)]
mod tests {
  use super::*;

  const EPS: f32 = 1e-5;

  #[test]
  fn embedding_is_unit_norm() {
    let e = Embedder::new();
    for text in ["lockout tagout", "Verify PPE before starting the press!", "a bb ccc dddd bb"] {
      let v = e.embed(text);
      assert_eq!(v.len(), DIM);
      assert!((magnitude(&v) - 1.0).abs() < EPS, "text {text:?} not unit norm");
    }
  }

  #[test]
  fn untokenizable_text_embeds_to_zero() {
    let e = Embedder::new();
    for text in ["", "   ", "a b c", "!!! ??", "安全第一"] {
      let v = e.embed(text);
      assert!(v.iter().all(|x| *x == 0.0), "text {text:?} should be zero");
    }
  }

  #[test]
  fn embedding_is_deterministic_and_case_insensitive() {
    let e = Embedder::new();
    assert_eq!(e.embed("Lockout TAGOUT"), e.embed("lockout, tagout."));
  }

  #[test]
  fn self_similarity_is_one_and_symmetric() {
    let e = Embedder::new();
    let a = e.embed("lockout tagout safety");
    let b = e.embed("dimensional quality check");
    assert!((cosine_similarity(&a, &a) - 1.0).abs() < EPS);
    assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < EPS);
  }

  #[test]
  fn zero_vector_similarity_is_zero() {
    let e = Embedder::new();
    let zero = e.embed("");
    let a = e.embed("machine guard");
    assert_eq!(cosine_similarity(&zero, &a), 0.0);
    assert_eq!(cosine_similarity(&zero, &zero), 0.0);
  }

  #[test]
  fn hash_matches_reference_values() {
    // "ab" = 97*31 + 98
    assert_eq!(hash_token("ab"), 3105);
    assert_eq!(hash_token("a"), 97);
  }
}
