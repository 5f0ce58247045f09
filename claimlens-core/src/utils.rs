//! Small pure helpers shared across the workspace.

/// Clamp a value between `min` and `max`.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// Clamp a value into the unit interval.
pub fn clamp01(value: f64) -> f64 {
    clamp(value, 0.0, 1.0)
}

/// Cosine similarity between two vectors: `dot(a,b) / (‖a‖·‖b‖)`.
///
/// Mismatched lengths and zero-norm vectors score 0.0 — callers that care
/// about dimension mismatches (mixed embedding models) must filter before
/// ranking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// djb2 string hash rendered in base36, used for cache keys.
pub fn hash_string(input: &str) -> String {
    let mut hash: i32 = 5381;
    for unit in input.encode_utf16() {
        hash = hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(i32::from(unit));
    }
    to_base36(hash.unsigned_abs() as u64)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Coerce a JSON value that may be a number or a numeric string into f64.
/// The Gamma API serializes volume/liquidity as strings.
pub fn coerce_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp01_bounds() {
        assert_eq!(clamp01(-0.5), 0.0);
        assert_eq!(clamp01(1.5), 1.0);
        assert_eq!(clamp01(0.42), 0.42);
    }

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![0.3f32, 0.5, 0.7];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-9, "got {}", sim);
    }

    #[test]
    fn cosine_orthogonal_vectors_is_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_opposite_vectors_is_negative_one() {
        let a = vec![1.0f32, 2.0];
        let b = vec![-1.0f32, -2.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim + 1.0).abs() < 1e-9, "got {}", sim);
    }

    #[test]
    fn cosine_mismatched_lengths_scores_zero() {
        let a = vec![1.0f32, 2.0, 3.0];
        let b = vec![1.0f32, 2.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_zero_norm_scores_zero() {
        let a = vec![0.0f32, 0.0];
        let b = vec![1.0f32, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn hash_string_is_stable_and_distinct() {
        let h1 = hash_string("Will the Fed cut rates by March 2026?");
        let h2 = hash_string("Will the Fed cut rates by March 2026?");
        let h3 = hash_string("Will Bitcoin reach $100k?");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert!(!h1.is_empty());
    }

    #[test]
    fn coerce_f64_handles_numbers_and_strings() {
        assert_eq!(coerce_f64(&serde_json::json!(12.5)), Some(12.5));
        assert_eq!(coerce_f64(&serde_json::json!("500000.25")), Some(500000.25));
        assert_eq!(coerce_f64(&serde_json::json!(" 3 ")), Some(3.0));
        assert_eq!(coerce_f64(&serde_json::json!("abc")), None);
        assert_eq!(coerce_f64(&serde_json::json!(null)), None);
        assert_eq!(coerce_f64(&serde_json::json!([1.0])), None);
    }
}
