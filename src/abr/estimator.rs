use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThroughputSample {
    pub bits_per_second: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct EstimatorState {
    window: usize,
    average: Option<f64>,
    last_sample: Option<DateTime<Utc>>,
}

impl EstimatorState {
    fn alpha(&self) -> f64 {
        2.0 / (self.window as f64 + 1.0)
    }
}

/// 吞吐量估计 (指数加权移动平均)
#[derive(Debug, Clone)]
pub struct ThroughputEstimator {
    state: Arc<RwLock<EstimatorState>>,
}

impl ThroughputEstimator {
    pub fn new(window: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(EstimatorState {
                window: window.max(1),
                average: None,
                last_sample: None,
            })),
        }
    }

    /// Feeds one download. Zero-length durations carry no rate and are ignored.
    pub async fn ingest(&self, bytes: u64, duration: Duration, timestamp: DateTime<Utc>) {
        let seconds = duration.as_secs_f64();
        if seconds <= 0.0 {
            return;
        }
        let raw = bytes as f64 * 8.0 / seconds;

        let mut state = self.state.write().await;
        let alpha = state.alpha();
        let average = match state.average {
            Some(previous) => alpha * raw + (1.0 - alpha) * previous,
            None => raw,
        };
        state.average = Some(average);
        state.last_sample = Some(timestamp);
        debug!("Throughput sample {:.0} bps, average {:.0} bps", raw, average);
    }

    pub async fn sample(&self) -> Option<ThroughputSample> {
        let state = self.state.read().await;
        Some(ThroughputSample {
            bits_per_second: state.average?,
            timestamp: state.last_sample?,
        })
    }

    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.average = None;
        state.last_sample = None;
    }

    pub async fn set_window(&self, window: usize) {
        self.state.write().await.window = window.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::test;

    #[test]
    async fn test_first_sample_seeds_average() {
        let estimator = ThroughputEstimator::new(3);
        assert!(estimator.sample().await.is_none());

        let now = Utc::now();
        estimator.ingest(125_000, Duration::from_secs(1), now).await;
        let sample = estimator.sample().await.unwrap();
        assert_eq!(sample.bits_per_second, 1_000_000.0);
        assert_eq!(sample.timestamp, now);
    }

    #[test]
    async fn test_ewma_weighting() {
        // window 3 => alpha 0.5
        let estimator = ThroughputEstimator::new(3);
        estimator.ingest(125_000, Duration::from_secs(1), Utc::now()).await;
        estimator.ingest(375_000, Duration::from_secs(1), Utc::now()).await;
        let sample = estimator.sample().await.unwrap();
        assert!((sample.bits_per_second - 2_000_000.0).abs() < 1e-6);
    }

    #[test]
    async fn test_zero_duration_ignored_and_reset() {
        let estimator = ThroughputEstimator::new(5);
        estimator.ingest(1_000, Duration::ZERO, Utc::now()).await;
        assert!(estimator.sample().await.is_none());

        estimator.ingest(1_000, Duration::from_millis(500), Utc::now()).await;
        assert!(estimator.sample().await.is_some());
        estimator.reset().await;
        assert!(estimator.sample().await.is_none());
    }

    #[test]
    async fn test_window_never_below_one() {
        let estimator = ThroughputEstimator::new(0);
        estimator.ingest(100, Duration::from_secs(1), Utc::now()).await;
        estimator.ingest(200, Duration::from_secs(1), Utc::now()).await;
        // alpha 1 keeps only the newest sample
        assert_eq!(estimator.sample().await.unwrap().bits_per_second, 1_600.0);

        estimator.set_window(3).await;
        estimator.ingest(0, Duration::from_secs(1), Utc::now()).await;
        assert_eq!(estimator.sample().await.unwrap().bits_per_second, 800.0);
    }
}
