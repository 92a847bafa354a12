// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static metadata for known models, plus the model-id
//! grammar used to parse a bare `"<provider>:<family>-<version>"` string
//! into its parts.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Input modalities supported by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputModality {
    Text,
    Image,
}

/// Metadata for a single model, as returned by `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    /// Provider-scoped model identifier (e.g. "gpt-4o", "claude-3-5-sonnet").
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Provider identifier: "openai" | "anthropic" | "google" | "mock".
    pub provider: String,
    /// Total context window in tokens (input + output).
    pub context_window: u32,
    /// Maximum output tokens per completion.
    pub max_output_tokens: u32,
    /// Supported input modalities. Defaults to `[text]`.
    pub input_modalities: Vec<InputModality>,
}

impl ModelCatalogEntry {
    pub fn supports_images(&self) -> bool {
        self.input_modalities.contains(&InputModality::Image)
    }
}

/// Return all entries from the bundled static catalog.
///
/// This is a conservative, hand-maintained list used only as a fallback
/// when a gateway client's own `list_models()` probe is unavailable; the
/// presenter and estimator never depend on it being exhaustive.
pub fn static_catalog() -> Vec<ModelCatalogEntry> {
    vec![
        ModelCatalogEntry {
            id: "gpt-4o".into(),
            name: "GPT-4o".into(),
            provider: "openai".into(),
            context_window: 128_000,
            max_output_tokens: 16_384,
            input_modalities: vec![InputModality::Text, InputModality::Image],
        },
        ModelCatalogEntry {
            id: "gpt-4o-mini".into(),
            name: "GPT-4o mini".into(),
            provider: "openai".into(),
            context_window: 128_000,
            max_output_tokens: 16_384,
            input_modalities: vec![InputModality::Text, InputModality::Image],
        },
        ModelCatalogEntry {
            id: "claude-3-5-sonnet".into(),
            name: "Claude 3.5 Sonnet".into(),
            provider: "anthropic".into(),
            context_window: 200_000,
            max_output_tokens: 8_192,
            input_modalities: vec![InputModality::Text, InputModality::Image],
        },
        ModelCatalogEntry {
            id: "claude-3-5-haiku".into(),
            name: "Claude 3.5 Haiku".into(),
            provider: "anthropic".into(),
            context_window: 200_000,
            max_output_tokens: 8_192,
            input_modalities: vec![InputModality::Text, InputModality::Image],
        },
        ModelCatalogEntry {
            id: "gemini-2.0-flash".into(),
            name: "Gemini 2.0 Flash".into(),
            provider: "google".into(),
            context_window: 1_000_000,
            max_output_tokens: 8_192,
            input_modalities: vec![InputModality::Text, InputModality::Image],
        },
    ]
}

/// Look up a single model by provider and id (or name).
pub fn lookup(provider: &str, model_id: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.provider == provider && (e.id == model_id || e.name == model_id))
}

/// Look up a model by bare model name (without provider prefix).
pub fn lookup_by_model_name(model_name: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.id == model_name || e.name == model_name)
}

/// Returns `true` if the model supports image input, defaulting to `false`
/// when the model is not found in the catalog.
pub fn supports_images(provider: &str, model_id: &str) -> bool {
    lookup(provider, model_id).map(|e| e.supports_images()).unwrap_or(false)
}

/// Look up the context window for a model. Falls back to `default` if not in catalog.
pub fn context_window(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id).map(|e| e.context_window).unwrap_or(default)
}

/// Look up the max output tokens for a model. Falls back to `default` if not in catalog.
pub fn max_output_tokens(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id).map(|e| e.max_output_tokens).unwrap_or(default)
}

/// The parsed parts of a `"<provider>:<family>-<version>"` model identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedModelId {
    /// Empty when the id carries no `provider:` prefix.
    pub provider: String,
    pub family: String,
    /// `"latest"` when the id carries no recognised version suffix.
    pub version: String,
}

fn version_regex() -> Regex {
    Regex::new(r"[-_](\d{4}-\d{2}-\d{2}|\d{8}|\d{4}|\d{6}|\d+\.\d+(?:\.\d+)?)$")
        .expect("version regex is a fixed valid pattern")
}

/// Parse a model identifier of the form `<provider>:<family>-<version>`.
///
/// The provider prefix is optional (`"gpt-4o"` parses with an empty
/// provider); the version suffix is optional and recognises dates
/// (`YYYY-MM-DD`, `YYYYMMDD`), year/month shorthands (`YYMM`, `YYYYMM`,
/// `YYYY`), and dotted semantic versions (`X.Y` or `X.Y.Z`). When no
/// version suffix matches, `version` is `"latest"` and `family` is the
/// whole remainder.
pub fn parse_model_id(model_id: &str) -> ParsedModelId {
    let (provider, rest) = match model_id.split_once(':') {
        Some((p, r)) => (p.to_string(), r),
        None => (String::new(), model_id),
    };

    let re = version_regex();
    match re.find(rest) {
        Some(m) => {
            let family = rest[..m.start()].to_string();
            let version = rest[m.start() + 1..].to_string();
            ParsedModelId { provider, family, version }
        }
        None => ParsedModelId { provider, family: rest.to_string(), version: "latest".into() },
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
