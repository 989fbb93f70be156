//! Auto-discard policy for chronically unprofitable cards.

use crate::domain::Card;
use rust_decimal::Decimal;
use std::fmt;

/// Rolling-mean rule needs at least this many closes.
pub const MIN_MEAN_SAMPLES: usize = 3;
/// Consecutive losing closes that trigger a discard.
pub const LOSING_STREAK: usize = 5;

/// Why a card left the pool through the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    RealizedLoss { pnl_percent: Decimal, threshold: Decimal },
    RollingMean { mean: Decimal, samples: usize, threshold: Decimal },
    LosingStreak { streak: usize },
    Manual { detail: String },
}

impl DiscardReason {
    /// Short reason code handed to the archive.
    pub fn code(&self) -> &'static str {
        match self {
            DiscardReason::RealizedLoss { .. } => "realized_loss",
            DiscardReason::RollingMean { .. } => "rolling_mean",
            DiscardReason::LosingStreak { .. } => "losing_streak",
            DiscardReason::Manual { .. } => "manual",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            DiscardReason::RealizedLoss {
                pnl_percent,
                threshold,
            } => format!("realized {}% below threshold {}%", pnl_percent, threshold),
            DiscardReason::RollingMean {
                mean,
                samples,
                threshold,
            } => format!(
                "mean of last {} closes {}% below threshold {}%",
                samples,
                mean.round_dp(4),
                threshold
            ),
            DiscardReason::LosingStreak { streak } => {
                format!("last {} closes were all losses", streak)
            }
            DiscardReason::Manual { detail } => detail.clone(),
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.detail())
    }
}

/// Evaluated on the closing card right after its close entry was appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardPolicy {
    /// `None` disables the policy.
    pub loss_threshold: Option<Decimal>,
    /// N for the rolling-mean rule.
    pub window: usize,
}

impl DiscardPolicy {
    pub fn new(loss_threshold: Option<Decimal>, window: usize) -> Self {
        Self {
            loss_threshold,
            window,
        }
    }

    pub fn evaluate(&self, card: &Card, realized_pnl_percent: Decimal) -> Option<DiscardReason> {
        let threshold = self.loss_threshold?;

        if realized_pnl_percent < threshold {
            return Some(DiscardReason::RealizedLoss {
                pnl_percent: realized_pnl_percent,
                threshold,
            });
        }

        let recent: Vec<Decimal> = card
            .history
            .closes()
            .filter_map(|e| e.pnl_percent)
            .take(self.window)
            .collect();
        if let Some(mean) = rolling_mean(&recent) {
            if mean < threshold {
                return Some(DiscardReason::RollingMean {
                    mean,
                    samples: recent.len(),
                    threshold,
                });
            }
        }

        let streak = card
            .history
            .closes()
            .take(LOSING_STREAK)
            .filter(|e| e.is_loss())
            .count();
        if streak == LOSING_STREAK {
            return Some(DiscardReason::LosingStreak { streak });
        }

        None
    }
}

/// Mean of `samples`, or `None` below [`MIN_MEAN_SAMPLES`]. When the plain
/// sum overflows, the samples are scaled down before summing.
fn rolling_mean(samples: &[Decimal]) -> Option<Decimal> {
    if samples.len() < MIN_MEAN_SAMPLES {
        return None;
    }
    let n = Decimal::from(samples.len());
    checked_sum(samples.iter().copied())
        .map(|sum| sum / n)
        .or_else(|| checked_sum(samples.iter().map(|v| *v / n)))
}

fn checked_sum(mut values: impl Iterator<Item = Decimal>) -> Option<Decimal> {
    values.try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
}
