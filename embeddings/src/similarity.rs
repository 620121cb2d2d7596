//! Similarity computation for embeddings.

use ordered_float::OrderedFloat;

use crate::error::{EmbeddingError, Result};

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical direction
/// - 0.0 means orthogonal vectors (or a zero vector on either side)
/// - -1.0 means opposite vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let magnitude_a = magnitude(a);
    let magnitude_b = magnitude(b);

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot_product / (magnitude_a * magnitude_b))
}

fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Whether a vector is usable for similarity search: non-empty and finite.
pub fn is_valid_embedding(v: &[f32]) -> bool {
    !v.is_empty() && v.iter().all(|x| x.is_finite())
}

/// Score every candidate against `query` and return the positions and
/// scores of the best `k` with `score >= min_score`, best first. Ties keep
/// candidate order.
pub fn rank_top_k<'a, I>(query: &[f32], candidates: I, k: usize, min_score: f32) -> Result<Vec<(usize, f32)>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut scored: Vec<(usize, OrderedFloat<f32>)> = Vec::new();
    for (position, candidate) in candidates.into_iter().enumerate() {
        let score = cosine_similarity(query, candidate)?;
        if score >= min_score {
            scored.push((position, OrderedFloat(score)));
        }
    }

    // Stable sort, descending by score.
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(k);

    Ok(scored.into_iter().map(|(p, s)| (p, s.0)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cosine_similarity_identical() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[2.0, 0.0, 0.0]).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_is_valid_embedding() {
        assert!(is_valid_embedding(&[0.1, 0.2]));
        assert!(!is_valid_embedding(&[]));
        assert!(!is_valid_embedding(&[0.1, f32::NAN]));
        assert!(!is_valid_embedding(&[f32::INFINITY]));
    }

    #[test]
    fn test_rank_top_k() {
        let candidates: Vec<Vec<f32>> = vec![
            vec![0.0, 1.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.7, 0.7, 0.0],
        ];

        let ranked = rank_top_k(
            &[1.0, 0.0, 0.0],
            candidates.iter().map(Vec::as_slice),
            2,
            0.0,
        )
        .unwrap();

        let positions: Vec<usize> = ranked.iter().map(|(p, _)| *p).collect();
        assert_eq!(positions, vec![1, 2]);
    }

    #[test]
    fn test_rank_top_k_min_score() {
        let candidates: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let ranked = rank_top_k(&[1.0, 0.0], candidates.iter().map(Vec::as_slice), 5, 0.5).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0, 0);
    }
}
