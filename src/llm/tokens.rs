//! Token and cost estimation for generator calls.
//!
//! The backend does not report usage; the core estimates from text length
//! (~4 characters per token) and configured per-1k pricing.

/// Usage and cost estimate for one generator call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenCost {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

/// Estimate token count from text length. Non-empty text is at least one
/// token.
pub fn estimate_tokens(text: &str) -> u64 {
    let t = text.trim();
    if t.is_empty() {
        return 0;
    }
    ((t.len() / 4) as u64).max(1)
}

/// Combine input/output token estimates with per-1k pricing.
pub fn estimate_cost(
    input_tokens: u64,
    output_tokens: u64,
    cost_per_1k_input: f64,
    cost_per_1k_output: f64,
) -> TokenCost {
    let input_cost = (input_tokens as f64 / 1000.0) * cost_per_1k_input;
    let output_cost = (output_tokens as f64 / 1000.0) * cost_per_1k_output;
    TokenCost {
        input_tokens,
        output_tokens,
        total_tokens: input_tokens + output_tokens,
        input_cost,
        output_cost,
        total_cost: input_cost + output_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   "), 0);
    }

    #[test]
    fn short_text_is_at_least_one_token() {
        assert_eq!(estimate_tokens("hi"), 1);
    }

    #[test]
    fn cost_scales_with_pricing() {
        let tc = estimate_cost(2000, 1000, 0.0005, 0.0015);
        assert_eq!(tc.total_tokens, 3000);
        assert!((tc.input_cost - 0.001).abs() < 1e-12);
        assert!((tc.output_cost - 0.0015).abs() < 1e-12);
        assert!((tc.total_cost - 0.0025).abs() < 1e-12);
    }
}
