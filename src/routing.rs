//! Complexity classification and cost-aware model selection.
//!
//! The classifier is deliberately cheap — string features over the user
//! messages, no model calls — and feeds a weighted score in `[0, 1]`:
//!
//! ```text
//! score = 0.25·min(L/4000, 1) + 0.25·code + 0.25·multi_step + 0.25·min(max_tokens/2000, 1)
//! ```
//!
//! Selection then picks the cheapest (provider, model) from the pricing
//! table whose capability covers the task class, restricted to the tenant's
//! enabled providers. Every plan also carries up to two fallback attempts
//! so the dispatcher can fail over without consulting the router again.

use serde::Serialize;

use crate::models::{approx_tokens, ChatRequest, ProviderKind};
use crate::pricing::{self, Capability, ModelSpec};

/// Completion estimate used for savings when the client omits `max_tokens`.
const DEFAULT_COMPLETION_ESTIMATE: u32 = 256;

/// Total attempts the dispatcher may make (primary + fallbacks).
pub const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

impl TaskClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trivial => "trivial",
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        }
    }

    /// Minimum model capability that can serve this class.
    pub fn required_capability(&self) -> Capability {
        match self {
            Self::Trivial => 0,
            Self::Simple => 1,
            Self::Moderate => 2,
            Self::Complex => 3,
        }
    }

    fn from_score(score: f64) -> Self {
        if score < 0.2 {
            Self::Trivial
        } else if score < 0.4 {
            Self::Simple
        } else if score < 0.7 {
            Self::Moderate
        } else {
            Self::Complex
        }
    }

    /// The half-open score interval this class covers.
    fn interval(&self) -> (f64, f64) {
        match self {
            Self::Trivial => (0.0, 0.2),
            Self::Simple => (0.2, 0.4),
            Self::Moderate => (0.4, 0.7),
            Self::Complex => (0.7, 1.0),
        }
    }
}

impl std::fmt::Display for TaskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    /// Honour the requested model; no classification.
    Explicit,
    /// Cheapest adequate model.
    Cost,
    /// Cheapest model one capability class above adequate.
    Balanced,
}

impl RouteMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "explicit" => Some(Self::Explicit),
            "cost" => Some(Self::Cost),
            "balanced" => Some(Self::Balanced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Classification {
    pub class: TaskClass,
    pub score: f64,
    /// Distance-from-boundary confidence in `[0.5, 1.0]`.
    pub confidence: f64,
    pub prompt_chars: usize,
}

/// Score the concatenated user messages.
pub fn classify(req: &ChatRequest) -> Classification {
    let text = req.user_text();
    let lower = text.to_lowercase();
    let length = text.len();

    let length_feature = (length as f64 / 4000.0).min(1.0);
    let code_feature = if has_code_signal(&lower) { 1.0 } else { 0.0 };
    let multi_step_feature = multi_step_signal(&lower);
    let max_tokens_feature = (req.max_tokens.unwrap_or(0) as f64 / 2000.0).min(1.0);

    let score = 0.25 * length_feature
        + 0.25 * code_feature
        + 0.25 * multi_step_feature
        + 0.25 * max_tokens_feature;

    let class = TaskClass::from_score(score);
    Classification {
        class,
        score,
        confidence: boundary_confidence(score, class),
        prompt_chars: length,
    }
}

const CODE_TOKENS: [&str; 10] = [
    "```", "fn ", "def ", "class ", "import ", "select ", "function ", "#include", "return ",
    "const ",
];

fn has_code_signal(lower: &str) -> bool {
    if CODE_TOKENS.iter().any(|t| lower.contains(t)) {
        return true;
    }
    // Two or more arithmetic/comparison operators reads as an expression,
    // one is ordinary prose ("2+2", "A=B").
    let ops = lower
        .chars()
        .filter(|c| matches!(c, '+' | '*' | '/' | '%' | '=' | '<' | '>'))
        .count();
    ops >= 2
}

const STEP_MARKERS: [&str; 5] = ["step", "then", "first", "finally", "next"];

fn multi_step_signal(lower: &str) -> f64 {
    let has_marker = lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| STEP_MARKERS.contains(&word));
    if has_marker {
        return 1.0;
    }
    let questions = lower.matches('?').count();
    (questions as f64 / 4.0).min(1.0)
}

/// Confidence grows with distance from the nearest class boundary: dead
/// centre of an interval scores 1.0, sitting on a boundary scores 0.5.
fn boundary_confidence(score: f64, class: TaskClass) -> f64 {
    let (low, high) = class.interval();
    let half_width = (high - low) / 2.0;
    let distance = (score - low).min(high - score).max(0.0);
    0.5 + 0.5 * (distance / half_width).min(1.0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub provider: ProviderKind,
    pub model: String,
}

/// Everything the dispatcher needs: the ordered attempts plus the metadata
/// persisted to the routing-decision ledger and echoed to smart clients.
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub attempts: Vec<Attempt>,
    pub requested_model: String,
    pub reason: String,
    pub estimated_savings: f64,
    pub classification: Option<Classification>,
}

impl RoutePlan {
    pub fn selected(&self) -> &Attempt {
        &self.attempts[0]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no enabled providers are configured for this organization")]
    NoProviders,
    #[error("no configured provider serves model `{0}`")]
    NoProviderForModel(String),
}

/// Build a route plan for a request.
///
/// `enabled` is the tenant's enabled providers with their registry
/// priorities, as returned by the provider registry — already filtered to
/// rows with usable credentials.
pub fn plan(
    req: &ChatRequest,
    mode: RouteMode,
    enabled: &[(ProviderKind, i32)],
) -> Result<RoutePlan, RouteError> {
    if enabled.is_empty() {
        return Err(RouteError::NoProviders);
    }
    match mode {
        RouteMode::Explicit => plan_explicit(req, enabled),
        RouteMode::Cost => plan_classified(req, enabled, 0),
        RouteMode::Balanced => plan_classified(req, enabled, 1),
    }
}

fn priority_of(enabled: &[(ProviderKind, i32)], kind: ProviderKind) -> Option<i32> {
    enabled.iter().find(|(k, _)| *k == kind).map(|(_, p)| *p)
}

fn estimated_cost(spec: &ModelSpec, input_tokens: u32, output_tokens: u32) -> f64 {
    (input_tokens as f64 * spec.input_per_1k + output_tokens as f64 * spec.output_per_1k) / 1000.0
}

fn request_token_estimates(req: &ChatRequest) -> (u32, u32) {
    (
        approx_tokens(req.content_chars()),
        req.max_tokens.unwrap_or(DEFAULT_COMPLETION_ESTIMATE),
    )
}

/// Adequate candidates across the enabled providers, cheapest first, ties
/// broken by registry priority then name for determinism.
fn adequate_candidates(
    req: &ChatRequest,
    enabled: &[(ProviderKind, i32)],
    required: Capability,
) -> Vec<&'static ModelSpec> {
    let (input_est, output_est) = request_token_estimates(req);
    let mut candidates: Vec<(&'static ModelSpec, f64, i32)> = pricing::MODEL_TABLE
        .iter()
        .filter_map(|spec| {
            let priority = priority_of(enabled, spec.provider)?;
            (spec.capability >= required).then_some((
                spec,
                estimated_cost(spec, input_est, output_est),
                priority,
            ))
        })
        .collect();

    if candidates.is_empty() {
        // No enabled provider reaches the class; degrade to the strongest
        // capability on offer rather than failing the request.
        let best = pricing::MODEL_TABLE
            .iter()
            .filter(|s| priority_of(enabled, s.provider).is_some())
            .map(|s| s.capability)
            .max()
            .unwrap_or(0);
        if best >= required {
            return Vec::new();
        }
        return adequate_candidates(req, enabled, best);
    }

    candidates.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.2.cmp(&b.2))
            .then(a.0.model.cmp(b.0.model))
    });
    candidates.into_iter().map(|(spec, _, _)| spec).collect()
}

fn plan_explicit(
    req: &ChatRequest,
    enabled: &[(ProviderKind, i32)],
) -> Result<RoutePlan, RouteError> {
    let requested = req.model.clone();
    let owners = pricing::owners(&requested);

    let mut attempts: Vec<Attempt> = Vec::new();
    let required = owners.iter().map(|s| s.capability).max();

    // The requested model on every enabled provider that serves it, in
    // registry-priority order.
    let mut owner_attempts: Vec<(i32, Attempt)> = owners
        .iter()
        .filter_map(|spec| {
            let priority = priority_of(enabled, spec.provider)?;
            Some((
                priority,
                Attempt {
                    provider: spec.provider,
                    model: requested.clone(),
                },
            ))
        })
        .collect();
    owner_attempts.sort_by_key(|(priority, _)| *priority);
    attempts.extend(owner_attempts.into_iter().map(|(_, a)| a));

    if attempts.is_empty() {
        if owners.is_empty() {
            // Unknown model: send it verbatim to the highest-priority
            // provider and let the upstream decide. Billed as zero (§pricing).
            let (kind, _) = enabled
                .iter()
                .min_by_key(|(_, p)| *p)
                .expect("enabled is non-empty");
            attempts.push(Attempt {
                provider: *kind,
                model: requested.clone(),
            });
        } else {
            return Err(RouteError::NoProviderForModel(requested));
        }
    }

    // Model-transient fallbacks: next adequate models, skipping the
    // requested one.
    let required = required.unwrap_or(TaskClass::Moderate.required_capability());
    for spec in adequate_candidates(req, enabled, required) {
        if attempts.len() >= MAX_ATTEMPTS {
            break;
        }
        let attempt = Attempt {
            provider: spec.provider,
            model: spec.model.to_string(),
        };
        if spec.model != requested.to_lowercase() && !attempts.contains(&attempt) {
            attempts.push(attempt);
        }
    }
    attempts.truncate(MAX_ATTEMPTS);

    Ok(RoutePlan {
        attempts,
        requested_model: requested,
        reason: "explicit model selection".into(),
        estimated_savings: 0.0,
        classification: None,
    })
}

fn plan_classified(
    req: &ChatRequest,
    enabled: &[(ProviderKind, i32)],
    headroom: Capability,
) -> Result<RoutePlan, RouteError> {
    let classification = classify(req);
    let required = (classification.class.required_capability() + headroom).min(3);

    let candidates = adequate_candidates(req, enabled, required);
    let chosen = candidates.first().ok_or(RouteError::NoProviders)?;

    let attempts: Vec<Attempt> = candidates
        .iter()
        .take(MAX_ATTEMPTS)
        .map(|spec| Attempt {
            provider: spec.provider,
            model: spec.model.to_string(),
        })
        .collect();

    let (input_est, output_est) = request_token_estimates(req);
    let requested_cost = pricing::owners(&req.model)
        .first()
        .map(|spec| estimated_cost(spec, input_est, output_est))
        .unwrap_or(0.0);
    let savings =
        pricing::round6((requested_cost - estimated_cost(chosen, input_est, output_est)).max(0.0));

    let reason = if chosen.model == req.model.to_lowercase() {
        format!(
            "{} task, requested model already cheapest adequate",
            classification.class
        )
    } else {
        format!(
            "{} task, downgraded to cheapest adequate model ({})",
            classification.class, chosen.model
        )
    };

    Ok(RoutePlan {
        attempts,
        requested_model: req.model.clone(),
        reason,
        estimated_savings: savings,
        classification: Some(classification),
    })
}
