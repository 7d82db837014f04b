//! Response-language detection and normalization.
//!
//! Detection is keyword/script based and only meant to notice when a learner
//! switches language mid-conversation; it returns `None` rather than guessing.

use crate::util::{is_cjk, is_devanagari};

const WORD_HINTS: &[(&str, &[&str])] = &[
  ("es", &["hola", "gracias", "seguridad", "maquina", "máquina", "calidad"]),
  ("fr", &["bonjour", "merci", "sécurité", "qualité"]),
  ("de", &["hallo", "danke", "sicherheit", "maschine", "qualität"]),
  ("pt", &["olá", "obrigado", "segurança", "qualidade"]),
];

const SUPPORTED: &[&str] = &["en", "es", "fr", "de", "pt", "hi", "zh"];

pub fn detect_language(text: &str) -> Option<&'static str> {
  if text.contains('¿') || text.contains('¡') {
    return Some("es");
  }

  let lowered = text.to_lowercase();
  let words: Vec<&str> = lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect();
  for (code, hints) in WORD_HINTS {
    if words.iter().any(|w| hints.contains(w)) {
      return Some(code);
    }
  }

  if text.chars().any(is_devanagari) {
    return Some("hi");
  }
  if text.chars().any(is_cjk) {
    return Some("zh");
  }
  None
}

/// Map a locale tag ("es-MX", "ZH_cn", " en ") to a two-letter code; default "en".
pub fn normalize_language(language: Option<&str>) -> String {
  let raw = match language {
    Some(l) => l.trim().to_lowercase(),
    None => return "en".into(),
  };
  if raw.len() == 2 && raw.chars().all(|c| c.is_ascii_alphabetic()) {
    return raw;
  }
  SUPPORTED
    .iter()
    .find(|code| raw.starts_with(**code))
    .map(|code| code.to_string())
    .unwrap_or_else(|| "en".into())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn detects_by_keyword_and_script() {
    assert_eq!(detect_language("¿Dónde está el extintor?"), Some("es"));
    assert_eq!(detect_language("Gracias, y la seguridad?"), Some("es"));
    assert_eq!(detect_language("Merci pour la qualité"), Some("fr"));
    assert_eq!(detect_language("Danke! Maschine stoppt"), Some("de"));
    assert_eq!(detect_language("Obrigado pela ajuda"), Some("pt"));
    assert_eq!(detect_language("सुरक्षा जांच"), Some("hi"));
    assert_eq!(detect_language("安全检查怎么做"), Some("zh"));
  }

  #[test]
  fn english_is_not_misdetected() {
    assert_eq!(detect_language("How do I restart the machine after a jam?"), None);
    assert_eq!(detect_language(""), None);
  }

  #[test]
  fn normalizes_locale_tags() {
    assert_eq!(normalize_language(None), "en");
    assert_eq!(normalize_language(Some("  ")), "en");
    assert_eq!(normalize_language(Some("ES")), "es");
    assert_eq!(normalize_language(Some("pt-BR")), "pt");
    assert_eq!(normalize_language(Some("zh_Hans")), "zh");
    assert_eq!(normalize_language(Some("klingon")), "en");
  }
}
