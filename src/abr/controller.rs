use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::estimator::ThroughputSample;
use crate::config::AbrPolicy;
use crate::hls::{BufferState, QualityPolicy, VariantPlaylist};

/// 缓冲低于该值视为耗尽
const DEPLETED_BUFFER_SECS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    ManualLock,
    Disabled,
    VariantsUnavailable,
    MissingBitrate,
    InsufficientMetrics,
    BoundaryReached,
    ConsecutiveFailures,
    BufferDepleted,
    ThroughputDecreased,
    ThroughputIncreased,
    Hysteresis,
    MinimumInterval,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::ManualLock => "manual_lock",
            DecisionReason::Disabled => "disabled",
            DecisionReason::VariantsUnavailable => "variants_unavailable",
            DecisionReason::MissingBitrate => "missing_bitrate",
            DecisionReason::InsufficientMetrics => "insufficient_metrics",
            DecisionReason::BoundaryReached => "boundary_reached",
            DecisionReason::ConsecutiveFailures => "consecutive_failures",
            DecisionReason::BufferDepleted => "buffer_depleted",
            DecisionReason::ThroughputDecreased => "throughput_decreased",
            DecisionReason::ThroughputIncreased => "throughput_increased",
            DecisionReason::Hysteresis => "hysteresis",
            DecisionReason::MinimumInterval => "minimum_interval",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionAction {
    Hold,
    SwitchVariant(VariantPlaylist),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbrDecision {
    pub action: DecisionAction,
    pub reason: DecisionReason,
    pub timestamp: DateTime<Utc>,
}

impl AbrDecision {
    fn hold(reason: DecisionReason) -> Self {
        Self {
            action: DecisionAction::Hold,
            reason,
            timestamp: Utc::now(),
        }
    }

    fn switch(variant: VariantPlaylist, reason: DecisionReason) -> Self {
        Self {
            action: DecisionAction::SwitchVariant(variant),
            reason,
            timestamp: Utc::now(),
        }
    }

    pub fn is_switch(&self) -> bool {
        matches!(self.action, DecisionAction::SwitchVariant(_))
    }
}

#[derive(Debug)]
struct ControllerState {
    policy: AbrPolicy,
    quality: QualityPolicy,
    variants: Vec<VariantPlaylist>,
    current: Option<VariantPlaylist>,
    consecutive_failures: u32,
    last_switch: Option<Instant>,
    buffer_established: bool,
    latest: Option<AbrDecision>,
}

impl ControllerState {
    /// 按码率排序的候选, 跳过没有码率的变体
    fn neighbours(&self, current: &VariantPlaylist) -> (Option<VariantPlaylist>, Option<VariantPlaylist>) {
        let mut ladder: Vec<&VariantPlaylist> = self
            .variants
            .iter()
            .filter(|variant| variant.bitrate().is_some())
            .collect();
        ladder.sort_by_key(|variant| variant.bitrate());

        match ladder.iter().position(|variant| variant.url == current.url) {
            Some(index) => (
                index.checked_sub(1).and_then(|i| ladder.get(i)).map(|v| (*v).clone()),
                ladder.get(index + 1).map(|v| (*v).clone()),
            ),
            None => (None, None),
        }
    }

    fn decide(&mut self, throughput: Option<ThroughputSample>, buffer: &BufferState) -> AbrDecision {
        if self.quality.is_locked() {
            return AbrDecision::hold(DecisionReason::ManualLock);
        }
        if !self.policy.enabled {
            return AbrDecision::hold(DecisionReason::Disabled);
        }
        let current = match (&self.current, self.variants.is_empty()) {
            (Some(current), false) => current.clone(),
            _ => return AbrDecision::hold(DecisionReason::VariantsUnavailable),
        };
        let current_bitrate = match current.bitrate() {
            Some(bitrate) => bitrate as f64,
            None => return AbrDecision::hold(DecisionReason::MissingBitrate),
        };
        let throughput = match throughput {
            Some(sample) if sample.bits_per_second > 0.0 => sample.bits_per_second,
            _ => return AbrDecision::hold(DecisionReason::InsufficientMetrics),
        };
        if buffer.played_through.is_none() {
            return AbrDecision::hold(DecisionReason::BoundaryReached);
        }

        // 缓冲只在播放开始后才算建立
        let depleted = self.buffer_established && buffer.prefetch_depth_secs <= DEPLETED_BUFFER_SECS;
        if buffer.prefetch_depth_secs > DEPLETED_BUFFER_SECS || !buffer.ready_sequences.is_empty() {
            self.buffer_established = true;
        }

        let (lower, higher) = self.neighbours(&current);
        let hysteresis = self.policy.hysteresis_percent / 100.0;

        if let Some(lower) = &lower {
            let threshold = self.policy.failure_downgrade_threshold;
            if threshold > 0 && self.consecutive_failures >= threshold {
                return AbrDecision::switch(lower.clone(), DecisionReason::ConsecutiveFailures);
            }
            if depleted {
                return AbrDecision::switch(lower.clone(), DecisionReason::BufferDepleted);
            }
        }

        let downgrade_base = current_bitrate * self.policy.minimum_bitrate_ratio;
        if let Some(lower) = &lower {
            if throughput <= downgrade_base * (1.0 - hysteresis) {
                return AbrDecision::switch(lower.clone(), DecisionReason::ThroughputDecreased);
            }
        }

        let upgrade_base = higher
            .as_ref()
            .and_then(VariantPlaylist::bitrate)
            .map(|bitrate| bitrate as f64 * self.policy.maximum_bitrate_ratio);
        if let (Some(higher), Some(base)) = (&higher, upgrade_base) {
            if throughput >= base * (1.0 + hysteresis) {
                return AbrDecision::switch(higher.clone(), DecisionReason::ThroughputIncreased);
            }
        }

        let in_lower_band = lower.is_some() && throughput <= downgrade_base;
        let in_upper_band = upgrade_base.map_or(false, |base| throughput >= base);
        if in_lower_band || in_upper_band {
            return AbrDecision::hold(DecisionReason::Hysteresis);
        }

        AbrDecision::hold(DecisionReason::BoundaryReached)
    }
}

/// 自适应码率控制器
#[derive(Debug, Clone)]
pub struct AdaptiveVariantController {
    state: Arc<RwLock<ControllerState>>,
}

impl AdaptiveVariantController {
    pub fn new(policy: AbrPolicy) -> Self {
        Self {
            state: Arc::new(RwLock::new(ControllerState {
                policy,
                quality: QualityPolicy::Automatic,
                variants: Vec::new(),
                current: None,
                consecutive_failures: 0,
                last_switch: None,
                buffer_established: false,
                latest: None,
            })),
        }
    }

    /// Sets the ladder and starting variant for a new load.
    pub async fn configure(
        &self,
        variants: Vec<VariantPlaylist>,
        current: Option<VariantPlaylist>,
        quality: QualityPolicy,
    ) {
        let mut state = self.state.write().await;
        state.variants = variants;
        state.current = current;
        state.quality = quality;
    }

    /// Points the controller back at `variant` after a switch could not be
    /// carried out. The ladder and quality policy are left alone.
    pub async fn revert_to(&self, variant: Option<VariantPlaylist>) {
        let mut state = self.state.write().await;
        debug!(
            "ABR reverting to {}",
            variant.as_ref().map_or_else(|| "none".to_string(), VariantPlaylist::describe)
        );
        state.current = variant;
    }

    pub async fn update_policy(&self, policy: AbrPolicy) {
        self.state.write().await.policy = policy;
    }

    pub async fn set_quality(&self, quality: QualityPolicy) {
        self.state.write().await.quality = quality;
    }

    pub async fn current_variant(&self) -> Option<VariantPlaylist> {
        self.state.read().await.current.clone()
    }

    pub async fn register_failure(&self) {
        let mut state = self.state.write().await;
        state.consecutive_failures += 1;
        debug!("ABR consecutive failures: {}", state.consecutive_failures);
    }

    pub async fn reset_failures(&self) {
        self.state.write().await.consecutive_failures = 0;
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.state.read().await.consecutive_failures
    }

    /// 每次加载前调用, 保留策略和变体列表
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.consecutive_failures = 0;
        state.last_switch = None;
        state.buffer_established = false;
        state.latest = None;
    }

    pub async fn latest_decision(&self) -> Option<AbrDecision> {
        self.state.read().await.latest.clone()
    }

    /// Runs the decision rules. A switch is applied to the controller's own
    /// notion of the current variant before returning.
    pub async fn evaluate(&self, throughput: Option<ThroughputSample>, buffer: &BufferState) -> AbrDecision {
        let mut state = self.state.write().await;
        let mut decision = state.decide(throughput, buffer);

        if let DecisionAction::SwitchVariant(target) = &decision.action {
            let too_soon = state
                .last_switch
                .map_or(false, |at| at.elapsed() < state.policy.minimum_switch_interval());
            if too_soon {
                decision = AbrDecision::hold(DecisionReason::MinimumInterval);
            } else {
                info!(
                    "ABR switching to {} ({})",
                    target.describe(),
                    decision.reason
                );
                if decision.reason == DecisionReason::ConsecutiveFailures {
                    state.consecutive_failures = 0;
                }
                state.current = Some(target.clone());
                state.last_switch = Some(Instant::now());
                state.buffer_established = false;
            }
        }

        state.latest = Some(decision.clone());
        decision
    }
}
