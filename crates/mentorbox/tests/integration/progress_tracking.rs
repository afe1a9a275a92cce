use mentorbox::{ExecutionRequest, ProgressTracker};

use super::run;

#[tokio::test]
async fn test_results_feed_progress() {
    let mut tracker = ProgressTracker::new();

    let passed = run("print(sum(range(10)))").await;
    let failed = run("print(undefined_name)").await;
    tracker.record_result("loops", &passed);
    tracker.record_result("loops", &failed);
    tracker.record_result("loops", &passed);

    let metric = tracker.metric("loops").unwrap();
    assert_eq!(metric.practice_count, 3);
    assert_eq!(metric.success_count, 2);
    assert!(metric.practice_time.as_secs_f64() > 0.0);
    assert!(metric.skill_level > 0.0 && metric.skill_level < metric.success_rate);
}

#[tokio::test]
async fn test_rejected_submissions_count_as_attempts() {
    let mut tracker = ProgressTracker::new();
    let result = mentorbox::execute_code(&ExecutionRequest::python("def (:"))
        .await
        .unwrap();

    let metric = tracker.record_result("functions", &result);
    assert_eq!(metric.practice_count, 1);
    assert_eq!(metric.success_count, 0);
    assert_eq!(tracker.weak_topics(0.5), vec!["functions"]);
}
