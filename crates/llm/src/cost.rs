//! Per-model cost accounting
//!
//! USD cost per million tokens, matched by substring on the model name.
//! Unknown models (local Ollama and friends) cost nothing. Order matters:
//! more specific patterns come before their prefixes.

/// `(pattern, input $/1M tokens, output $/1M tokens)`
const COST_TABLE: &[(&str, f64, f64)] = &[
    // OpenAI
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4-turbo", 10.00, 30.00),
    ("gpt-4", 30.00, 60.00),
    ("gpt-3.5-turbo", 0.50, 1.50),
    ("o1-mini", 3.00, 12.00),
    ("o1", 15.00, 60.00),
    ("o3-mini", 1.10, 4.40),
    // Anthropic
    ("claude-3-5-sonnet", 3.00, 15.00),
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-3-opus", 15.00, 75.00),
    ("claude-sonnet-4", 3.00, 15.00),
    ("claude-haiku-4", 0.80, 4.00),
    ("claude-opus-4", 15.00, 75.00),
];

fn match_model(model: &str) -> Option<(f64, f64)> {
    let model = model.to_lowercase();
    COST_TABLE
        .iter()
        .find(|(pattern, _, _)| model.contains(pattern))
        .map(|(_, input, output)| (*input, *output))
}

/// USD cost of a request.
pub fn calculate_cost(model: &str, input_tokens: usize, output_tokens: usize) -> f64 {
    match match_model(model) {
        Some((input_rate, output_rate)) => {
            (input_tokens as f64 / 1_000_000.0) * input_rate
                + (output_tokens as f64 / 1_000_000.0) * output_rate
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_costs_are_positive() {
        let cost = calculate_cost("gpt-4o", 1_000_000, 1_000_000);
        assert!((cost - 12.50).abs() < 1e-9);
    }

    #[test]
    fn mini_variant_matches_before_base_pattern() {
        let cost = calculate_cost("gpt-4o-mini-2024-07-18", 1_000_000, 0);
        assert!((cost - 0.15).abs() < 1e-9);
    }

    #[test]
    fn dated_claude_models_match_by_substring() {
        let cost = calculate_cost("claude-3-5-sonnet-20241022", 2_000_000, 1_000_000);
        assert!((cost - (6.0 + 15.0)).abs() < 1e-9);
    }

    #[test]
    fn unknown_models_are_free() {
        assert_eq!(calculate_cost("qwen2.5-coder:14b", 1_000_000, 1_000_000), 0.0);
        assert_eq!(calculate_cost("llama3.1:8b", 500, 500), 0.0);
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        assert_eq!(calculate_cost("gpt-4", 0, 0), 0.0);
    }
}
