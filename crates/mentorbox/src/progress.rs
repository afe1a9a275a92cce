//! Per-topic practice metrics folded from execution results.

use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::ExecutionResult;

/// Weight of the newest success rate when updating a skill estimate.
const SKILL_SMOOTHING: f64 = 0.3;

/// Practice history for one topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMetric {
    pub practice_count: u32,
    pub success_count: u32,
    /// `success_count / practice_count`
    pub success_rate: f64,
    /// Smoothed estimate in `0.0..=1.0` that trails the success rate
    pub skill_level: f64,
    /// Total time spent on the topic
    #[serde(with = "duration_secs")]
    pub practice_time: Duration,
    pub last_practiced: DateTime<Utc>,
}

impl TopicMetric {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            practice_count: 0,
            success_count: 0,
            success_rate: 0.0,
            skill_level: 0.0,
            practice_time: Duration::ZERO,
            last_practiced: at,
        }
    }
}

/// In-memory store of [`TopicMetric`]s, keyed by topic in first-seen order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressTracker {
    topics: IndexMap<String, TopicMetric>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt at `topic`
    pub fn record(&mut self, topic: &str, success: bool, practice_time: Duration) -> &TopicMetric {
        self.record_at(topic, success, practice_time, Utc::now())
    }

    /// Record one attempt at `topic` as of `at`
    pub fn record_at(
        &mut self,
        topic: &str,
        success: bool,
        practice_time: Duration,
        at: DateTime<Utc>,
    ) -> &TopicMetric {
        let metric = self
            .topics
            .entry(topic.to_owned())
            .or_insert_with(|| TopicMetric::new(at));
        metric.practice_count += 1;
        if success {
            metric.success_count += 1;
        }
        metric.success_rate = f64::from(metric.success_count) / f64::from(metric.practice_count);
        metric.skill_level =
            (1.0 - SKILL_SMOOTHING) * metric.skill_level + SKILL_SMOOTHING * metric.success_rate;
        metric.practice_time += practice_time;
        metric.last_practiced = at;
        debug!(
            topic,
            success,
            rate = metric.success_rate,
            skill = metric.skill_level,
            "recorded practice"
        );
        metric
    }

    /// Record the outcome of a submission; its elapsed time counts as
    /// practice time
    pub fn record_result(&mut self, topic: &str, result: &ExecutionResult) -> &TopicMetric {
        let elapsed = Duration::try_from_secs_f64(result.elapsed_seconds()).unwrap_or_default();
        self.record(topic, result.succeeded(), elapsed)
    }

    pub fn metric(&self, topic: &str) -> Option<&TopicMetric> {
        self.topics.get(topic)
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&str, &TopicMetric)> {
        self.topics.iter().map(|(topic, metric)| (topic.as_str(), metric))
    }

    pub fn total_practice_time(&self) -> Duration {
        self.topics.values().map(|metric| metric.practice_time).sum()
    }

    /// Topics whose skill level is below `threshold`, weakest first
    pub fn weak_topics(&self, threshold: f64) -> Vec<&str> {
        let mut topics: Vec<_> = self
            .topics
            .iter()
            .filter(|(_, metric)| metric.skill_level < threshold)
            .collect();
        topics.sort_by(|a, b| a.1.skill_level.total_cmp(&b.1.skill_level));
        topics.into_iter().map(|(topic, _)| topic.as_str()).collect()
    }

    /// Topics whose skill level is at least `threshold`, strongest first
    pub fn strong_topics(&self, threshold: f64) -> Vec<&str> {
        let mut topics: Vec<_> = self
            .topics
            .iter()
            .filter(|(_, metric)| metric.skill_level >= threshold)
            .collect();
        topics.sort_by(|a, b| b.1.skill_level.total_cmp(&a.1.skill_level));
        topics.into_iter().map(|(topic, _)| topic.as_str()).collect()
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn success_rate_is_successes_over_attempts() {
        let mut tracker = ProgressTracker::new();
        tracker.record_at("loops", true, Duration::from_secs(10), at(1));
        tracker.record_at("loops", false, Duration::from_secs(5), at(2));
        let metric = tracker.record_at("loops", true, Duration::from_secs(1), at(3)).clone();

        assert_eq!(metric.practice_count, 3);
        assert_eq!(metric.success_count, 2);
        assert!((metric.success_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(metric.practice_time, Duration::from_secs(16));
        assert_eq!(metric.last_practiced, at(3));
    }

    #[test]
    fn skill_level_trails_success_rate() {
        let mut tracker = ProgressTracker::new();
        let first = tracker.record("recursion", true, Duration::ZERO).skill_level;
        assert!((first - 0.3).abs() < 1e-12);
        let second = tracker.record("recursion", true, Duration::ZERO).skill_level;
        assert!((second - 0.51).abs() < 1e-12);
    }

    #[test]
    fn weak_and_strong_topics_are_sorted() {
        let mut tracker = ProgressTracker::new();
        for _ in 0..10 {
            tracker.record("strings", true, Duration::ZERO);
        }
        for _ in 0..3 {
            tracker.record("dicts", true, Duration::ZERO);
        }
        tracker.record("classes", false, Duration::ZERO);

        assert_eq!(tracker.weak_topics(0.5), vec!["classes"]);
        assert_eq!(tracker.weak_topics(0.9), vec!["classes", "dicts"]);
        assert_eq!(tracker.strong_topics(0.5), vec!["strings", "dicts"]);
        assert!(tracker.strong_topics(1.1).is_empty());
    }

    #[test]
    fn unknown_topic_has_no_metric() {
        let tracker = ProgressTracker::new();
        assert!(tracker.metric("anything").is_none());
        assert_eq!(tracker.total_practice_time(), Duration::ZERO);
    }

    #[test]
    fn metrics_serialize_with_seconds() {
        let mut tracker = ProgressTracker::new();
        tracker.record_at("math", true, Duration::from_millis(1500), at(0));
        let json = serde_json::to_value(&tracker).unwrap();
        assert_eq!(json["topics"]["math"]["practice_time"], 1.5);
        let back: ProgressTracker = serde_json::from_value(json).unwrap();
        assert_eq!(back.metric("math"), tracker.metric("math"));
    }
}
