pub const INITIAL_RATING: i32 = 1200;

pub const RATING_FLOOR: i32 = 100;

/// Outcome of rating one side of a finished match.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EloOutcome {
    pub new_rating: i32,
    pub k_factor: i32,
    pub delta: i32,
}

/// K shrinks as a player's (per-character) game count grows.
pub fn k_factor(total_games: u32) -> i32 {
    if total_games < 30 {
        40
    } else if total_games < 100 {
        20
    } else {
        10
    }
}

/// <https://en.wikipedia.org/wiki/Elo_rating_system#Mathematical_details>
pub fn expected_score(rating: i32, opponent_rating: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent_rating - rating) as f64 / 400.0))
}

pub fn rate(rating: i32, total_games: u32, opponent_rating: i32, won: bool) -> EloOutcome {
    let k = k_factor(total_games);
    let score = if won { 1.0 } else { 0.0 };
    let expected = expected_score(rating, opponent_rating);
    let new_rating = (rating as f64 + k as f64 * (score - expected)).round() as i32;
    let new_rating = new_rating.max(RATING_FLOOR);
    EloOutcome {
        new_rating,
        k_factor: k,
        delta: new_rating - rating,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_k_factor_tiers() {
        assert_eq!(k_factor(0), 40);
        assert_eq!(k_factor(29), 40);
        assert_eq!(k_factor(30), 20);
        assert_eq!(k_factor(99), 20);
        assert_eq!(k_factor(100), 10);
        assert_eq!(k_factor(1000), 10);
    }

    #[test]
    fn test_expected_score_symmetry() {
        let e1 = expected_score(1500, 1300);
        let e2 = expected_score(1300, 1500);
        assert!((e1 + e2 - 1.0).abs() < 1e-12);
        assert!(e1 > 0.5);
    }

    #[test]
    fn test_equal_provisional_players_swing_twenty() {
        let winner = rate(1200, 0, 1200, true);
        let loser = rate(1200, 0, 1200, false);
        assert_eq!(winner.new_rating, 1220);
        assert_eq!(winner.delta, 20);
        assert_eq!(winner.k_factor, 40);
        assert_eq!(loser.new_rating, 1180);
        assert_eq!(loser.delta, -20);
    }

    #[test]
    fn test_rating_floor() {
        let floored = rate(100, 0, 100, false);
        assert_eq!(floored.new_rating, RATING_FLOOR);
        assert_eq!(floored.delta, 0);
    }

    #[test]
    fn test_hopeless_loss_changes_nothing() {
        // The expected score against a 2000-rated opponent is so close to
        // zero that the rounded adjustment vanishes.
        let outcome = rate(100, 0, 2000, false);
        assert_eq!(outcome.new_rating, 100);
        assert_eq!(outcome.delta, 0);
    }

    #[test]
    fn test_zero_sum_with_equal_k() {
        for (a, b) in [(1200, 1200), (1500, 1300), (1873, 1122), (1001, 1000)] {
            let winner = rate(a, 10, b, true);
            let loser = rate(b, 10, a, false);
            assert_eq!(winner.k_factor, loser.k_factor);
            let sum = winner.delta + loser.delta;
            assert!(
                sum.abs() <= 1,
                "deltas for {} vs {} sum to {}",
                a,
                b,
                sum
            );
        }
        let winner = rate(1200, 0, 1200, true);
        let loser = rate(1200, 0, 1200, false);
        assert_eq!(winner.delta + loser.delta, 0);
    }

    #[test]
    fn test_k_is_per_player() {
        // A veteran beating a newcomer moves by K=10, the newcomer by K=40.
        let veteran = rate(1500, 250, 1400, true);
        let newcomer = rate(1400, 3, 1500, false);
        assert_eq!(veteran.k_factor, 10);
        assert_eq!(newcomer.k_factor, 40);
    }
}
