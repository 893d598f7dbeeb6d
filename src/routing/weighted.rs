//! Cumulative-weight random selection.

use crate::core::RegionId;
use rand::Rng;

/// Pick one candidate with probability proportional to its weight.
///
/// Draws `r` uniformly in `[0, total)` and subtracts each weight in turn
/// until the remainder is non-positive. Candidates with zero weight are
/// never chosen. Returns `None` when no candidate has positive weight.
pub fn weighted_pick<'a, R: Rng>(candidates: &'a [(RegionId, f64)], rng: &mut R) -> Option<&'a str> {
    let total: f64 = candidates
        .iter()
        .map(|(_, w)| *w)
        .filter(|w| *w > 0.0)
        .sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }

    let mut remainder = rng.gen_range(0.0..total);
    let mut last = None;
    for (id, weight) in candidates.iter().filter(|(_, w)| *w > 0.0) {
        remainder -= weight;
        last = Some(id.as_str());
        if remainder <= 0.0 {
            return last;
        }
    }
    // Floating-point residue lands on the last positive candidate.
    last
}
