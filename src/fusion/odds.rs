//! American odds helpers and Kelly stake sizing.
//!
//! American prices: `-110` risks 110 to win 100, `+150` risks 100 to win 150.
//! Prices strictly between -100 and +100 are not valid quotes.

/// Whether `american` is a quotable price: at most -100 or at least +100.
pub fn is_valid_american(american: i32) -> bool {
    american.abs() >= 100
}

/// Implied win probability of an American price (vig included).
pub fn implied_probability(american: i32) -> f64 {
    let odds = american as f64;
    if odds > 0.0 {
        100.0 / (odds + 100.0)
    } else {
        let abs = odds.abs();
        abs / (abs + 100.0)
    }
}

/// Two-way implied probabilities with the bookmaker margin removed.
pub fn no_vig_probabilities(price_a: i32, price_b: i32) -> (f64, f64) {
    let a = implied_probability(price_a);
    let b = implied_probability(price_b);
    let overround = a + b;
    if overround <= 0.0 {
        return (0.5, 0.5);
    }
    (a / overround, b / overround)
}

/// Profit per unit staked on a win.
pub fn profit_per_unit(american: i32) -> f64 {
    let odds = american as f64;
    if odds > 0.0 {
        odds / 100.0
    } else {
        100.0 / odds.abs()
    }
}

/// Fair American price for a win probability.
pub fn probability_to_american(prob: f64) -> i32 {
    let p = prob.clamp(0.01, 0.99);
    if p >= 0.5 {
        (-(p / (1.0 - p)) * 100.0).round() as i32
    } else {
        (((1.0 - p) / p) * 100.0).round() as i32
    }
}

/// Fractional Kelly stake as a fraction of bankroll, capped at `max_fraction`.
///
///   f* = (b·p − q) / b
///
/// with `b` the net profit per unit at `american`. Returns 0.0 without an edge.
pub fn kelly_stake(win_prob: f64, american: i32, kelly_fraction: f64, max_fraction: f64) -> f64 {
    let b = profit_per_unit(american);
    if b <= 0.0 || !(0.0..=1.0).contains(&win_prob) {
        return 0.0;
    }
    let p = win_prob;
    let q = 1.0 - p;
    let f = (b * p - q) / b;
    if f <= 0.0 {
        return 0.0;
    }
    (f * kelly_fraction).clamp(0.0, max_fraction)
}

/// Expected value per unit staked at `american` given `win_prob`.
pub fn expected_value(win_prob: f64, american: i32) -> f64 {
    win_prob * profit_per_unit(american) - (1.0 - win_prob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn implied_probability_both_signs() {
        assert_relative_eq!(implied_probability(-110), 110.0 / 210.0, epsilon = 1e-12);
        assert_relative_eq!(implied_probability(150), 0.4, epsilon = 1e-12);
        assert_relative_eq!(implied_probability(-200), 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn no_vig_sums_to_one() {
        let (a, b) = no_vig_probabilities(-110, -110);
        assert_relative_eq!(a, 0.5, epsilon = 1e-12);
        assert_relative_eq!(a + b, 1.0, epsilon = 1e-12);
        let (fav, dog) = no_vig_probabilities(-200, 170);
        assert!(fav > dog);
        assert_relative_eq!(fav + dog, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn prices_inside_even_money_are_invalid() {
        assert!(is_valid_american(-110));
        assert!(is_valid_american(100));
        assert!(is_valid_american(-100));
        assert!(!is_valid_american(0));
        assert!(!is_valid_american(50));
        assert!(!is_valid_american(-99));
    }

    #[test]
    fn standard_juice_pays_ten_elevenths() {
        assert_relative_eq!(profit_per_unit(-110), 0.909_090_9, epsilon = 1e-6);
        assert_relative_eq!(profit_per_unit(150), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn probability_to_american_round_trips_roughly() {
        assert_eq!(probability_to_american(0.6), -150);
        assert_eq!(probability_to_american(0.4), 150);
        assert_relative_eq!(implied_probability(probability_to_american(0.75)), 0.75, epsilon = 1e-3);
    }

    #[test]
    fn kelly_no_edge_at_fair_price() {
        assert_relative_eq!(kelly_stake(0.5, 100, 1.0, 1.0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn kelly_positive_edge_and_fraction() {
        // Even money, p = 0.6 → f* = 0.2
        assert_relative_eq!(kelly_stake(0.6, 100, 1.0, 1.0), 0.2, epsilon = 1e-9);
        assert_relative_eq!(kelly_stake(0.6, 100, 0.25, 1.0), 0.05, epsilon = 1e-9);
    }

    #[test]
    fn kelly_is_capped() {
        assert_relative_eq!(kelly_stake(0.9, 100, 1.0, 0.05), 0.05, epsilon = 1e-12);
    }

    #[test]
    fn kelly_negative_edge() {
        assert_relative_eq!(kelly_stake(0.5, -110, 1.0, 1.0), 0.0, epsilon = 1e-12);
        assert!(expected_value(0.5, -110) < 0.0);
    }
}
