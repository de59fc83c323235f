//! Embedding vector utilities.

/// Cosine similarity clamped to `[0.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude operand. Negative similarities clamp to `0.0`: provider
/// embeddings are compared as a non-negative closeness score.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON || !denom.is_finite() {
        return 0.0;
    }

    let sim = dot / denom;
    if sim.is_nan() { 0.0 } else { sim.clamp(0.0, 1.0) }
}

/// A usable embedding: non-empty, all components finite, and of the expected
/// dimension when one is given.
pub fn is_valid_embedding(vector: &[f32], expected_dim: Option<usize>) -> bool {
    if vector.is_empty() || !vector.iter().all(|v| v.is_finite()) {
        return false;
    }
    expected_dim.is_none_or(|dim| vector.len() == dim)
}

/// Index and score of the best-scoring candidate; ties keep the earliest.
pub fn best_match<'a, I>(query: &[f32], candidates: I) -> Option<(usize, f32)>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut best: Option<(usize, f32)> = None;
    for (idx, candidate) in candidates.into_iter().enumerate() {
        let sim = cosine_similarity(query, candidate);
        match best {
            Some((_, top)) if sim <= top => {}
            _ => best = Some((idx, sim)),
        }
    }
    best
}
