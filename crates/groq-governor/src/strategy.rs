//! Adaptive strategy selection
//!
//! Maps the tightest of the two quota ratios onto one of four throttling
//! tiers, each with a fixed pacing policy. Thresholds are exclusive lower
//! bounds: a ratio of exactly 0.70 is `Moderate`, not `Aggressive`.

use quota_store::QuotaState;
use serde::Serialize;

const AGGRESSIVE_ABOVE: f64 = 0.70;
const MODERATE_ABOVE: f64 = 0.30;
const CONSERVATIVE_ABOVE: f64 = 0.10;

/// Throttling tier derived from remaining quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdaptiveStrategy {
    Aggressive,
    Moderate,
    Conservative,
    Critical,
}

impl AdaptiveStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            AdaptiveStrategy::Aggressive => "aggressive",
            AdaptiveStrategy::Moderate => "moderate",
            AdaptiveStrategy::Conservative => "conservative",
            AdaptiveStrategy::Critical => "critical",
        }
    }
}

/// Pacing policy for a tier.
///
/// `max_batch_size` and `skip_rate_limit_check` are advisory for callers
/// that fan out work; the governor itself only applies `delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveConfig {
    pub delay_ms: u64,
    pub max_batch_size: u32,
    pub skip_rate_limit_check: bool,
}

/// Tier for the given record, from `min(request ratio, token ratio)`.
pub fn compute_strategy(state: &QuotaState) -> AdaptiveStrategy {
    let min_ratio = state.request_ratio().min(state.token_ratio());
    if min_ratio > AGGRESSIVE_ABOVE {
        AdaptiveStrategy::Aggressive
    } else if min_ratio > MODERATE_ABOVE {
        AdaptiveStrategy::Moderate
    } else if min_ratio > CONSERVATIVE_ABOVE {
        AdaptiveStrategy::Conservative
    } else {
        AdaptiveStrategy::Critical
    }
}

/// Fixed policy table.
pub const fn config_for(strategy: AdaptiveStrategy) -> AdaptiveConfig {
    match strategy {
        AdaptiveStrategy::Aggressive => AdaptiveConfig {
            delay_ms: 0,
            max_batch_size: 20,
            skip_rate_limit_check: false,
        },
        AdaptiveStrategy::Moderate => AdaptiveConfig {
            delay_ms: 100,
            max_batch_size: 15,
            skip_rate_limit_check: false,
        },
        AdaptiveStrategy::Conservative => AdaptiveConfig {
            delay_ms: 500,
            max_batch_size: 10,
            skip_rate_limit_check: false,
        },
        AdaptiveStrategy::Critical => AdaptiveConfig {
            delay_ms: 2000,
            max_batch_size: 5,
            skip_rate_limit_check: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quota_store::QuotaDefaults;

    fn state(requests: (u64, u64), tokens: (u64, u64)) -> QuotaState {
        QuotaState {
            requests_remaining_rpd: requests.0,
            requests_limit_rpd: requests.1,
            tokens_remaining_tpm: tokens.0,
            tokens_limit_tpm: tokens.1,
            ..QuotaState::with_defaults(QuotaDefaults::default())
        }
    }

    #[test]
    fn full_quota_is_aggressive() {
        let s = state((14_400, 14_400), (6_000, 6_000));
        let strategy = compute_strategy(&s);
        assert_eq!(strategy, AdaptiveStrategy::Aggressive);
        let config = config_for(strategy);
        assert_eq!(config.delay_ms, 0);
        assert_eq!(config.max_batch_size, 20);
    }

    #[test]
    fn low_request_quota_is_critical() {
        // 500 / 14400 ≈ 0.035
        let s = state((500, 14_400), (6_000, 6_000));
        let strategy = compute_strategy(&s);
        assert_eq!(strategy, AdaptiveStrategy::Critical);
        let config = config_for(strategy);
        assert_eq!(config.delay_ms, 2000);
        assert!(config.skip_rate_limit_check);
    }

    #[test]
    fn exactly_seventy_percent_is_moderate() {
        assert_eq!(
            compute_strategy(&state((7, 10), (10, 10))),
            AdaptiveStrategy::Moderate
        );
        assert_eq!(
            compute_strategy(&state((10_080, 14_400), (6_000, 6_000))),
            AdaptiveStrategy::Moderate
        );
    }

    #[test]
    fn just_above_seventy_percent_is_aggressive() {
        assert_eq!(
            compute_strategy(&state((10_081, 14_400), (6_000, 6_000))),
            AdaptiveStrategy::Aggressive
        );
    }

    #[test]
    fn lower_boundaries_are_exclusive() {
        assert_eq!(
            compute_strategy(&state((3, 10), (10, 10))),
            AdaptiveStrategy::Conservative
        );
        assert_eq!(
            compute_strategy(&state((1, 10), (10, 10))),
            AdaptiveStrategy::Critical
        );
        assert_eq!(
            compute_strategy(&state((0, 10), (10, 10))),
            AdaptiveStrategy::Critical
        );
    }

    #[test]
    fn tightest_dimension_wins() {
        // Requests plentiful, tokens at 20%
        let s = state((14_400, 14_400), (1_200, 6_000));
        assert_eq!(compute_strategy(&s), AdaptiveStrategy::Conservative);
    }

    #[test]
    fn only_critical_skips_rate_limit_check() {
        for strategy in [
            AdaptiveStrategy::Aggressive,
            AdaptiveStrategy::Moderate,
            AdaptiveStrategy::Conservative,
        ] {
            assert!(!config_for(strategy).skip_rate_limit_check, "{strategy:?}");
        }
        assert!(config_for(AdaptiveStrategy::Critical).skip_rate_limit_check);
    }

    #[test]
    fn delays_grow_and_batches_shrink_as_quota_tightens() {
        let tiers = [
            AdaptiveStrategy::Aggressive,
            AdaptiveStrategy::Moderate,
            AdaptiveStrategy::Conservative,
            AdaptiveStrategy::Critical,
        ];
        let configs: Vec<_> = tiers.iter().map(|t| config_for(*t)).collect();
        assert_eq!(
            configs.iter().map(|c| c.delay_ms).collect::<Vec<_>>(),
            vec![0, 100, 500, 2000]
        );
        assert_eq!(
            configs.iter().map(|c| c.max_batch_size).collect::<Vec<_>>(),
            vec![20, 15, 10, 5]
        );
    }

    #[test]
    fn strategy_serializes_lowercase() {
        let json = serde_json::to_string(&AdaptiveStrategy::Conservative).unwrap();
        assert_eq!(json, "\"conservative\"");
        assert_eq!(AdaptiveStrategy::Critical.label(), "critical");
    }

    #[test]
    fn config_serializes_camel_case() {
        let json = serde_json::to_value(config_for(AdaptiveStrategy::Critical)).unwrap();
        assert_eq!(json["delayMs"], 2000);
        assert_eq!(json["maxBatchSize"], 5);
        assert_eq!(json["skipRateLimitCheck"], true);
    }
}
