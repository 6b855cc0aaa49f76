//! Strategy auto-adjustment.
//!
//! After a busy sweep the agent's strategy is nudged towards what its
//! recent results support: less output and a stricter bar when tasks keep
//! failing, more output when both success and quality are high.

use penman_core::{AgentMetrics, Strategy};

const LOW_SUCCESS_RATE: f64 = 0.60;
const HIGH_SUCCESS_RATE: f64 = 0.85;
const HIGH_QUALITY: f64 = 80.0;
const LOW_QUALITY: f64 = 75.0;
const MAX_THRESHOLD: f64 = 90.0;
const MIN_ARTICLES_PER_WEEK: u32 = 1;
const MAX_ARTICLES_PER_WEEK: u32 = 7;

/// The strategy `current` should move to given `metrics`.
pub fn adjust(current: &Strategy, metrics: &AgentMetrics) -> Strategy {
    let mut next = current.clone();

    if metrics.success_rate < LOW_SUCCESS_RATE {
        next.articles_per_week = current
            .articles_per_week
            .saturating_sub(1)
            .max(MIN_ARTICLES_PER_WEEK);
        next.quality_threshold = (current.quality_threshold + 5.0).min(MAX_THRESHOLD);
    } else if metrics.success_rate > HIGH_SUCCESS_RATE && metrics.avg_quality_score > HIGH_QUALITY
    {
        next.articles_per_week = (current.articles_per_week + 1).min(MAX_ARTICLES_PER_WEEK);
    }

    // Applied on top of the current threshold, replacing the +5 above.
    if metrics.avg_quality_score < LOW_QUALITY {
        next.quality_threshold = (current.quality_threshold + 10.0).min(MAX_THRESHOLD);
    }

    next
}
