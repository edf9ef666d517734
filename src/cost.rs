//! Cost estimation from token usage and model pricing.
//!
//! Claude Code and Amp report `total_cost_usd` on their result event; Codex
//! only reports token usage. When a CLI omits the cost, the pipeline falls
//! back to this table, and finally to the profile's `cost_per_call`.

/// Model pricing in nanodollars per token (1 USD = 1_000_000_000 nanodollars).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPricing {
    pub input_nano_per_token: u64,
    pub output_nano_per_token: u64,
}

/// Token usage from a single invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn has_usage(&self) -> bool {
        self.input_tokens > 0 || self.output_tokens > 0
    }

    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Normalize model names to canonical form for pricing lookup.
fn normalize_model(model: &str) -> &str {
    let trimmed = model.trim();
    let bare = trimmed
        .rsplit_once('/')
        .map(|(_, name)| name)
        .unwrap_or(trimmed);

    match bare {
        s if s.contains("claude-opus-4") || s.contains("claude-4-opus") => "claude-opus-4",
        s if s.contains("claude-sonnet-4") || s.contains("claude-4-sonnet") => "claude-sonnet-4",
        s if s.contains("claude-3-5-haiku") || s.contains("claude-haiku") => "claude-haiku",
        s if s.contains("gpt-5-codex") || s.contains("codex-mini") => "gpt-5-codex",
        s if s.contains("gpt-5-mini") => "gpt-5-mini",
        s if s.contains("gpt-5") => "gpt-5",
        _ => bare,
    }
}

/// Get pricing for a model the Claude Code or Codex CLI can run. Returns
/// None for anything else.
///
/// $X per 1M tokens = X * 1000 nanodollars per token.
pub fn pricing_for_model(model: &str) -> Option<ModelPricing> {
    let (input, output) = match normalize_model(model) {
        "claude-opus-4" => (15_000, 75_000),
        "claude-sonnet-4" => (3_000, 15_000),
        "claude-haiku" => (800, 4_000),
        "gpt-5" | "gpt-5-codex" => (1_250, 10_000),
        "gpt-5-mini" => (250, 2_000),
        _ => return None,
    };
    Some(ModelPricing {
        input_nano_per_token: input,
        output_nano_per_token: output,
    })
}

/// Estimate the USD cost of an invocation. Returns None for unknown models
/// or empty usage so the caller can fall back to the profile's flat price.
pub fn cost_usd_from_usage(model: &str, usage: &TokenUsage) -> Option<f64> {
    if !usage.has_usage() {
        return None;
    }
    let Some(pricing) = pricing_for_model(model) else {
        tracing::debug!(model = %model, "No pricing for model, falling back to profile cost");
        return None;
    };

    let nano = usage
        .input_tokens
        .saturating_mul(pricing.input_nano_per_token)
        .saturating_add(
            usage
                .output_tokens
                .saturating_mul(pricing.output_nano_per_token),
        );
    Some(nano as f64 / 1_000_000_000.0)
}
