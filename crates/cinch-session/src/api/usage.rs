//! Token usage and cost normalization for one generation step.
//!
//! Providers report usage in many shapes: bare numbers, nested
//! `{total, noCache, cacheRead}` objects, snake_case OpenAI fields, or a
//! copy tucked under `metadata.<provider>.usage`. [`get_usage`] accepts all
//! of them and never fails: anything unparseable counts as zero.
//!
//! Cost is computed with [`Decimal`] so per-step costs add up exactly over a
//! long session. Any overflow collapses the step cost to zero rather than
//! persisting a poisoned value.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

// ── Model pricing ──────────────────────────────────────────────────

/// Per-model prices in USD per 1M tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    #[serde(with = "rust_decimal::serde::float")]
    pub input: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub output: Decimal,
    #[serde(with = "rust_decimal::serde::float", default)]
    pub cache_read: Decimal,
    #[serde(with = "rust_decimal::serde::float", default)]
    pub cache_write: Decimal,
}

impl ModelCost {
    /// Build from floating-point prices. Returns `None` if any price is
    /// NaN or infinite.
    pub fn from_f64(input: f64, output: f64, cache_read: f64, cache_write: f64) -> Option<Self> {
        Some(Self {
            input: Decimal::from_f64(input)?,
            output: Decimal::from_f64(output)?,
            cache_read: Decimal::from_f64(cache_read)?,
            cache_write: Decimal::from_f64(cache_write)?,
        })
    }

    /// Approximate pricing for a model by name.
    ///
    /// Matches on the segment after the last `/` so org prefixes like
    /// `"my-org/custom-sonnet-finetune"` don't cause false positives. Returns
    /// `None` for unknown models, which are then billed at zero.
    pub fn estimate_for(model_id: &str) -> Option<Self> {
        let name = model_id.rsplit('/').next().unwrap_or(model_id).to_lowercase();
        // (input, output, cache_read, cache_write) in hundredths of a dollar.
        let (i, o, r, w) = if name.contains("opus") {
            (1500, 7500, 150, 1875)
        } else if name.contains("sonnet") {
            (300, 1500, 30, 375)
        } else if name.contains("haiku") {
            (80, 400, 8, 100)
        } else if name.contains("4o-mini") {
            (15, 60, 8, 0)
        } else if name.contains("gpt-4o") {
            (250, 1000, 125, 0)
        } else if name.contains("gemini") && name.contains("flash") {
            (30, 250, 8, 0)
        } else if name.contains("gemini") {
            (125, 1000, 31, 0)
        } else if name.contains("deepseek") {
            (27, 110, 7, 0)
        } else {
            return None;
        };
        Some(Self {
            input: Decimal::new(i, 2),
            output: Decimal::new(o, 2),
            cache_read: Decimal::new(r, 2),
            cache_write: Decimal::new(w, 2),
        })
    }
}

/// The model a step ran against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider_id: String,
    pub model_id: String,
    #[serde(default)]
    pub cost: Option<ModelCost>,
}

impl ModelInfo {
    /// A model with no pricing information (billed at zero).
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: ModelCost) -> Self {
        self.cost = Some(cost);
        self
    }

    /// Attach the approximate pricing table entry for this model, if any.
    pub fn with_estimated_cost(mut self) -> Self {
        self.cost = ModelCost::estimate_for(&self.model_id);
        self
    }
}

/// Whether a provider's reported input-token count already excludes cached
/// tokens. Providers not listed include them, and cache reads/writes are
/// subtracted from the input count.
pub fn provider_excludes_cached_tokens(provider_id: &str) -> bool {
    matches!(
        provider_id,
        "anthropic" | "amazon-bedrock" | "bedrock" | "google-vertex-anthropic"
    )
}

// ── Token records ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTokens {
    pub read: u64,
    pub write: u64,
}

/// Canonical token counts for a step or a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
    pub cache: CacheTokens,
}

impl Tokens {
    /// Add another step's counts. Saturates instead of wrapping.
    pub fn accumulate(&mut self, other: &Tokens) {
        self.input = self.input.saturating_add(other.input);
        self.output = self.output.saturating_add(other.output);
        self.reasoning = self.reasoning.saturating_add(other.reasoning);
        self.cache.read = self.cache.read.saturating_add(other.cache.read);
        self.cache.write = self.cache.write.saturating_add(other.cache.write);
    }

    pub fn total(&self) -> u64 {
        self.input
            .saturating_add(self.output)
            .saturating_add(self.reasoning)
            .saturating_add(self.cache.read)
            .saturating_add(self.cache.write)
    }
}

/// Normalized usage for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepUsage {
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    pub tokens: Tokens,
}

// ── Normalization ──────────────────────────────────────────────────

const INPUT_KEYS: &[&str] = &["inputTokens", "input_tokens", "promptTokens", "prompt_tokens"];
const OUTPUT_KEYS: &[&str] = &[
    "outputTokens",
    "output_tokens",
    "completionTokens",
    "completion_tokens",
];

/// Read a token count from any JSON shape. Non-numeric, negative, and
/// non-finite values count as zero; objects contribute their `total`.
fn count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && *f > 0.0)
            .map_or(0, |f| f as u64),
        Some(Value::Object(map)) => count(map.get("total")),
        _ => 0,
    }
}

fn first<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k)).filter(|v| !v.is_null())
}

fn path<'a>(root: Option<&'a Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().try_fold(root?, |v, k| v.get(*k))
}

fn has_token_fields(v: &Value) -> bool {
    v.is_object() && (first(v, INPUT_KEYS).is_some() || first(v, OUTPUT_KEYS).is_some())
}

/// The usage object to read: the standard field when it carries token
/// counts, else the first `metadata.<provider>.usage` that does.
fn locate_usage<'a>(usage: Option<&'a Value>, metadata: Option<&'a Value>) -> Option<&'a Value> {
    if let Some(u) = usage
        && has_token_fields(u)
    {
        return Some(u);
    }
    let nested = metadata.and_then(Value::as_object).and_then(|providers| {
        providers
            .iter()
            .filter_map(|(_, v)| v.get("usage"))
            .find(|u| has_token_fields(u))
    });
    if nested.is_some() {
        debug!("using provider metadata usage in place of the standard usage field");
    }
    nested.or(usage)
}

/// Normalize a step's usage into canonical tokens and cost.
///
/// Never fails. `usage = None` (or any unrecognizable shape) yields a
/// zero-usage record.
pub fn get_usage(model: &ModelInfo, usage: Option<&Value>, metadata: Option<&Value>) -> StepUsage {
    let Some(raw) = locate_usage(usage, metadata) else {
        return StepUsage::default();
    };
    if !raw.is_object() {
        warn!("ignoring non-object usage payload: {raw}");
        return StepUsage::default();
    }

    let input_field = first(raw, INPUT_KEYS);
    let output_field = first(raw, OUTPUT_KEYS);

    let cache_read = match first(raw, &["cachedInputTokens", "cached_input_tokens", "cache_read_input_tokens"]) {
        Some(v) => count(Some(v)),
        None => input_field
            .and_then(|v| first(v, &["cacheRead", "cache_read"]))
            .map(|v| count(Some(v)))
            .or_else(|| path(Some(raw), &["prompt_tokens_details", "cached_tokens"]).map(|v| count(Some(v))))
            .unwrap_or(0),
    };

    let cache_write = [
        path(metadata, &["anthropic", "cacheCreationInputTokens"]),
        path(metadata, &["bedrock", "usage", "cacheWriteInputTokens"]),
        path(metadata, &["venice", "usage", "cacheCreationInputTokens"]),
        raw.get("cache_creation_input_tokens"),
        input_field.and_then(|v| first(v, &["cacheWrite", "cache_write"])),
    ]
    .into_iter()
    .flatten()
    .map(|v| count(Some(v)))
    .find(|n| *n > 0)
    .unwrap_or(0);

    let reasoning = first(raw, &["reasoningTokens", "reasoning_tokens"])
        .or_else(|| output_field.and_then(|v| v.get("reasoning")))
        .or_else(|| path(Some(raw), &["completion_tokens_details", "reasoning_tokens"]))
        .map_or(0, |v| count(Some(v)));

    // A nested `noCache` is authoritative; otherwise the provider table
    // decides whether cached tokens must be subtracted.
    let input = match input_field.and_then(|v| v.get("noCache")) {
        Some(no_cache) => count(Some(no_cache)),
        None => {
            let total = count(input_field);
            if provider_excludes_cached_tokens(&model.provider_id) {
                total
            } else {
                total.saturating_sub(cache_read.saturating_add(cache_write))
            }
        }
    };

    let output = match output_field.and_then(|v| v.get("text")) {
        Some(text) => count(Some(text)),
        None => count(output_field),
    };

    let tokens = Tokens {
        input,
        output,
        reasoning,
        cache: CacheTokens {
            read: cache_read,
            write: cache_write,
        },
    };

    StepUsage {
        cost: compute_cost(model, &tokens),
        tokens,
    }
}

/// Cost of `tokens` at the model's prices. Reasoning is billed at the output
/// rate. Zero for unpriced models or on arithmetic overflow.
pub fn compute_cost(model: &ModelInfo, tokens: &Tokens) -> Decimal {
    let Some(ref price) = model.cost else {
        return Decimal::ZERO;
    };
    let million = Decimal::from(1_000_000u32);
    let line = |count: u64, per_million: Decimal| -> Option<Decimal> {
        Decimal::from(count).checked_mul(per_million)?.checked_div(million)
    };
    let total = [
        line(tokens.input, price.input),
        line(tokens.output, price.output),
        line(tokens.cache.read, price.cache_read),
        line(tokens.cache.write, price.cache_write),
        line(tokens.reasoning, price.output),
    ]
    .into_iter()
    .try_fold(Decimal::ZERO, |acc, part| acc.checked_add(part?));

    match total {
        Some(cost) if cost >= Decimal::ZERO => cost,
        Some(cost) => {
            warn!("negative step cost {cost} for {}; recording 0", model.model_id);
            Decimal::ZERO
        }
        None => {
            warn!("step cost overflowed for {}; recording 0", model.model_id);
            Decimal::ZERO
        }
    }
}

/// Canonicalize a provider finish reason to a plain string.
///
/// Accepts a bare string or an object carrying `type`, `reason`, or
/// `unified`. Anything else is `"unknown"`.
pub fn canonical_finish_reason(value: Option<&Value>) -> String {
    let reason = match value {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(obj @ Value::Object(_)) => first(obj, &["type", "reason", "unified"]).and_then(Value::as_str),
        _ => None,
    };
    match reason.map(str::trim) {
        Some(r) if !r.is_empty() => r.to_string(),
        _ => "unknown".to_string(),
    }
}
