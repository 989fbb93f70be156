//! Score and rank derived from realized P&L.

use crate::domain::{Card, Rank};
use rust_decimal::Decimal;

const NEUTRAL: Decimal = Decimal::from_parts(50, 0, 0, false, 0);
const MAX_SCORE: Decimal = Decimal::ONE_HUNDRED;

/// Lower bounds of each band, highest first. Anything below 10 is `F`.
const RANK_LADDER: [(u32, Rank); 9] = [
    (90, Rank::S),
    (80, Rank::A),
    (70, Rank::BPlus),
    (60, Rank::B),
    (50, Rank::CPlus),
    (40, Rank::C),
    (30, Rank::CMinus),
    (20, Rank::D),
    (10, Rank::E),
];

/// `clamp(50 + pnl_percent * 2, 0, 100)`.
///
/// Inputs too large for `Decimal` arithmetic saturate at the bound they
/// were heading for.
pub fn score(pnl_percent: Decimal) -> Decimal {
    let raw = pnl_percent
        .checked_mul(Decimal::TWO)
        .and_then(|scaled| NEUTRAL.checked_add(scaled));
    match raw {
        Some(value) => value.clamp(Decimal::ZERO, MAX_SCORE),
        None if pnl_percent.is_sign_negative() => Decimal::ZERO,
        None => MAX_SCORE,
    }
}

pub fn rank(score: Decimal) -> Rank {
    RANK_LADDER
        .iter()
        .find(|(floor, _)| score >= Decimal::from(*floor))
        .map(|(_, rank)| *rank)
        .unwrap_or(Rank::F)
}

/// Recompute `score`/`rank` on a realized close.
pub fn apply(card: &mut Card, pnl_percent: Decimal) {
    let value = score(pnl_percent);
    card.score = Some(value);
    card.rank = Some(rank(value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_score_linear_around_neutral() {
        assert_eq!(score(Decimal::ZERO), d("50"));
        assert_eq!(score(d("8")), d("66"));
        assert_eq!(score(d("-12")), d("26"));
        assert_eq!(score(d("0.25")), d("50.5"));
    }

    #[test]
    fn test_score_saturates() {
        assert_eq!(score(d("40")), d("100"));
        assert_eq!(score(d("-40")), d("0"));
        assert_eq!(score(d("25")), d("100"));
        assert_eq!(score(d("-25")), d("0"));
    }

    #[test]
    fn test_score_saturates_at_decimal_extremes() {
        assert_eq!(score(Decimal::MAX), MAX_SCORE);
        assert_eq!(score(Decimal::MIN), Decimal::ZERO);
        assert_eq!(rank(score(Decimal::MAX)), Rank::S);
        assert_eq!(rank(score(Decimal::MIN)), Rank::F);
    }

    #[test]
    fn test_rank_bands() {
        assert_eq!(rank(d("0")), Rank::F);
        assert_eq!(rank(d("9.99")), Rank::F);
        assert_eq!(rank(d("10")), Rank::E);
        assert_eq!(rank(d("26")), Rank::D);
        assert_eq!(rank(d("35")), Rank::CMinus);
        assert_eq!(rank(d("45")), Rank::C);
        assert_eq!(rank(d("50")), Rank::CPlus);
        assert_eq!(rank(d("66")), Rank::B);
        assert_eq!(rank(d("75")), Rank::BPlus);
        assert_eq!(rank(d("89.9")), Rank::A);
        assert_eq!(rank(d("100")), Rank::S);
    }

    #[test]
    fn test_rank_is_monotonic() {
        let mut last = Rank::F;
        for s in 0..=100 {
            let r = rank(Decimal::from(s));
            assert!(r >= last);
            last = r;
        }
    }
}
