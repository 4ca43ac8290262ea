//! Elo Rating Calculation
//!
//! Logistic expected-score model with a fixed K factor.
//! Pure functions, no session required.

use serde::{Deserialize, Serialize};

/// Default K factor.
pub const DEFAULT_K_FACTOR: f64 = 32.0;

/// Lowest rating accepted from a client.
pub const MIN_RATING: i32 = 0;

/// Highest rating accepted from a client.
pub const MAX_RATING: i32 = 4000;

/// Clamp a declared rating into `MIN_RATING..=MAX_RATING`.
pub fn clamp_rating(rating: i32) -> i32 {
    rating.clamp(MIN_RATING, MAX_RATING)
}

/// Game score from one player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    /// Won the game.
    Win,
    /// Lost the game.
    Loss,
    /// Drew the game.
    Draw,
}

impl Score {
    /// Numeric score (1, 0 or 0.5).
    pub fn value(self) -> f64 {
        match self {
            Score::Win => 1.0,
            Score::Loss => 0.0,
            Score::Draw => 0.5,
        }
    }
}

/// Expected score of `rating` against `opponent`.
pub fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf((f64::from(opponent) - f64::from(rating)) / 400.0))
}

/// New ratings for both players after a game.
///
/// `score_a` is player A's score (1, 0 or 0.5); B scores `1 - score_a`.
pub fn rating_delta(rating_a: i32, rating_b: i32, score_a: f64, k_factor: f64) -> (i32, i32) {
    let expected_a = expected_score(rating_a, rating_b);
    let expected_b = 1.0 - expected_a;
    let score_b = 1.0 - score_a;

    let new_a = (f64::from(rating_a) + k_factor * (score_a - expected_a)).round() as i32;
    let new_b = (f64::from(rating_b) + k_factor * (score_b - expected_b)).round() as i32;
    (new_a, new_b)
}

/// Rating change for both sides of a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingChange {
    /// Rating of A after the game.
    pub new_a: i32,
    /// Rating of B after the game.
    pub new_b: i32,
    /// `new_a - old_a`.
    pub delta_a: i32,
    /// `new_b - old_b`.
    pub delta_b: i32,
}

impl RatingChange {
    /// Compute with the default K factor.
    pub fn compute(rating_a: i32, rating_b: i32, score_a: Score) -> Self {
        let (new_a, new_b) = rating_delta(rating_a, rating_b, score_a.value(), DEFAULT_K_FACTOR);
        Self {
            new_a,
            new_b,
            delta_a: new_a.saturating_sub(rating_a),
            delta_b: new_b.saturating_sub(rating_b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_equal_ratings_win() {
        assert_eq!(rating_delta(1200, 1200, 1.0, DEFAULT_K_FACTOR), (1216, 1184));
        assert_eq!(rating_delta(1200, 1200, 0.0, DEFAULT_K_FACTOR), (1184, 1216));
    }

    #[test]
    fn test_equal_ratings_draw_is_neutral() {
        assert_eq!(rating_delta(1500, 1500, 0.5, DEFAULT_K_FACTOR), (1500, 1500));
    }

    #[test]
    fn test_upset_moves_more_points() {
        let favourite_wins = RatingChange::compute(1600, 1200, Score::Win);
        let underdog_wins = RatingChange::compute(1600, 1200, Score::Loss);
        assert!(favourite_wins.delta_a < 5);
        assert!(underdog_wins.delta_b > 25);
    }

    #[test]
    fn test_rating_change_deltas() {
        let change = RatingChange::compute(1200, 1200, Score::Win);
        assert_eq!(change.delta_a, 16);
        assert_eq!(change.delta_b, -16);
    }

    #[test]
    fn test_extreme_ratings_do_not_overflow() {
        let change = RatingChange::compute(2_000_000_000, -2_000_000_000, Score::Win);
        assert_eq!(change.delta_a, 0);
        assert_eq!(change.delta_b, 0);

        let upset = RatingChange::compute(i32::MIN, i32::MAX, Score::Win);
        assert_eq!(upset.delta_a, 32);
        assert_eq!(upset.delta_b, -32);
    }

    #[test]
    fn test_clamp_rating() {
        assert_eq!(clamp_rating(-50), MIN_RATING);
        assert_eq!(clamp_rating(1500), 1500);
        assert_eq!(clamp_rating(i32::MAX), MAX_RATING);
    }

    proptest! {
        #[test]
        fn prop_parity_draw_sums_to_zero(rating in 100i32..3000) {
            let (a, b) = rating_delta(rating, rating, 0.5, DEFAULT_K_FACTOR);
            prop_assert_eq!((a - rating) + (b - rating), 0);
        }

        #[test]
        fn prop_deltas_nearly_cancel(
            ra in 100i32..3000,
            rb in 100i32..3000,
            score in prop::sample::select(vec![0.0f64, 0.5, 1.0]),
        ) {
            let (a, b) = rating_delta(ra, rb, score, DEFAULT_K_FACTOR);
            // each side rounds independently, so the sum may be off by one
            prop_assert!(((a - ra) + (b - rb)).abs() <= 1);
            prop_assert!((a - ra).abs() <= 32);
        }
    }
}
