use crate::models::evaluation::ScoreEntry;
use crate::models::rubric::Rubric;

/// Weighted total: Σ score × weight, summed in declared score order.
///
/// Ids missing from the rubric weigh 0. Duplicate rubric ids resolve to the
/// last declared weight. No normalization by the weight sum: weights of
/// `{0.9, 0.9}` against scores `{9, 9}` total 16.2.
pub fn aggregate(rubric: &Rubric, scores: &[ScoreEntry]) -> f64 {
    let weights = rubric.weights();
    scores.iter().fold(0.0, |total, entry| {
        let weight = weights
            .get(entry.criterion_id.as_str())
            .copied()
            .unwrap_or(0.0);
        total + entry.score * weight
    })
}
