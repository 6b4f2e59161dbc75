//! Static pricing and capability tables.
//!
//! One row per (provider, model): USD per 1K input/output tokens plus a
//! capability rank the smart router compares against a request's task class.
//! The table is versioned with the binary and read-only at runtime; unknown
//! models bill as zero and are logged at WARN so operators notice the gap.

use crate::models::ProviderKind;

/// Capability rank of a model, aligned with
/// [`crate::routing::TaskClass`] — a model can serve any class at or below
/// its rank.
pub type Capability = u8;

#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model: &'static str,
    /// USD per 1 000 input tokens.
    pub input_per_1k: f64,
    /// USD per 1 000 output tokens.
    pub output_per_1k: f64,
    pub capability: Capability,
}

/// The cheapest-to-strongest ladder per provider. Within a provider, cost
/// rises with capability — the router's cost-monotonicity assumption.
pub static MODEL_TABLE: &[ModelSpec] = &[
    // OpenAI
    spec(ProviderKind::OpenAi, "gpt-4o-mini", 0.000_15, 0.000_6, 1),
    spec(ProviderKind::OpenAi, "gpt-3.5-turbo", 0.000_5, 0.001_5, 1),
    spec(ProviderKind::OpenAi, "gpt-4o", 0.002_5, 0.01, 2),
    spec(ProviderKind::OpenAi, "gpt-4-turbo", 0.01, 0.03, 3),
    spec(ProviderKind::OpenAi, "gpt-4", 0.03, 0.06, 3),
    // Anthropic
    spec(ProviderKind::Anthropic, "claude-3-haiku", 0.000_25, 0.001_25, 1),
    spec(ProviderKind::Anthropic, "claude-3-5-sonnet", 0.003, 0.015, 2),
    spec(ProviderKind::Anthropic, "claude-3-opus", 0.015, 0.075, 3),
    // Mistral
    spec(ProviderKind::Mistral, "mistral-small-latest", 0.000_2, 0.000_6, 1),
    spec(ProviderKind::Mistral, "codestral-latest", 0.000_3, 0.000_9, 2),
    spec(ProviderKind::Mistral, "mistral-large-latest", 0.002, 0.006, 3),
    // Groq
    spec(ProviderKind::Groq, "llama-3.1-8b-instant", 0.000_05, 0.000_08, 1),
    spec(ProviderKind::Groq, "mixtral-8x7b-32768", 0.000_24, 0.000_24, 1),
    spec(ProviderKind::Groq, "llama-3.3-70b-versatile", 0.000_59, 0.000_79, 2),
];

const fn spec(
    provider: ProviderKind,
    model: &'static str,
    input_per_1k: f64,
    output_per_1k: f64,
    capability: Capability,
) -> ModelSpec {
    ModelSpec {
        provider,
        model,
        input_per_1k,
        output_per_1k,
        capability,
    }
}

/// Exact lookup by (provider, model). Model names are compared
/// case-insensitively; version suffixes are matched by prefix so
/// `gpt-4o-mini-2024-07-18` resolves to `gpt-4o-mini`.
pub fn lookup(provider: ProviderKind, model: &str) -> Option<&'static ModelSpec> {
    let model = model.to_lowercase();
    MODEL_TABLE
        .iter()
        .filter(|s| s.provider == provider)
        .find(|s| s.model == model)
        .or_else(|| {
            // Longest prefix match for versioned response model names.
            MODEL_TABLE
                .iter()
                .filter(|s| s.provider == provider && model.starts_with(s.model))
                .max_by_key(|s| s.model.len())
        })
}

/// Find which providers serve a model, ignoring provider when resolving the
/// name. Used for failover planning and for classifying unprefixed requests.
pub fn owners(model: &str) -> Vec<&'static ModelSpec> {
    let model = model.to_lowercase();
    MODEL_TABLE.iter().filter(|s| s.model == model).collect()
}

/// Cost in USD for a call, at 6 decimal places. Unknown (provider, model)
/// pairs bill zero and are logged at WARN.
pub fn cost(provider: ProviderKind, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    match lookup(provider, model) {
        Some(spec) => round6(
            (input_tokens as f64 * spec.input_per_1k + output_tokens as f64 * spec.output_per_1k)
                / 1000.0,
        ),
        None => {
            tracing::warn!(%provider, model, "no pricing for model — billing as zero");
            0.0
        }
    }
}

/// Costs are carried as `f64` rounded half-away-from-zero to 6 dp — the
/// precision the ledger stores.
pub fn round6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}
