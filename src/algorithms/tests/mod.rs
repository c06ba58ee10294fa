// src/algorithms/tests/mod.rs

/// Tests for Token Bucket algorithm
mod token_bucket_tests;


// Tests for Sliding Window algorithm
mod sliding_window_tests;


/// Behavior every in-process algorithm shares
mod common_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::algorithms::{LeakyBucket, RateLimitAlgorithm, SlidingWindow, TokenBucket};
    use crate::config::{LeakyBucketConfig, SlidingWindowConfig, TokenBucketConfig};
    use crate::test_utils::{shared, TestClock};

    fn local_algorithms(clock: &Arc<TestClock>) -> Vec<Box<dyn RateLimitAlgorithm>> {
        let cleanup_interval = Duration::from_secs(60);
        vec![
            Box::new(
                TokenBucket::with_clock(
                    TokenBucketConfig {
                        rate: 0.001,
                        capacity: 5.0,
                        cleanup_interval,
                    },
                    shared(clock),
                )
                .unwrap(),
            ),
            Box::new(
                LeakyBucket::with_clock(
                    LeakyBucketConfig {
                        rate: 0.001,
                        capacity: 5,
                        cleanup_interval,
                    },
                    shared(clock),
                )
                .unwrap(),
            ),
            Box::new(
                SlidingWindow::with_clock(
                    SlidingWindowConfig {
                        rate: 5,
                        window: Duration::from_secs(60),
                        sub_window: Duration::from_secs(10),
                        cleanup_interval,
                    },
                    shared(clock),
                )
                .unwrap(),
            ),
        ]
    }

    /// Test consistent behavior across all algorithm implementations
    #[tokio::test]
    async fn test_algorithm_trait_consistency() {
        let clock = TestClock::new();

        for algorithm in local_algorithms(&clock) {
            let name = algorithm.name();

            // All should allow exactly 5 requests
            for i in 0..5 {
                let status = algorithm.allow(name).await.unwrap();
                assert!(status.allowed, "{}: request {} should be allowed", name, i);
                assert_eq!(status.retry_after, Duration::ZERO);
            }

            // All should deny further requests with a positive wait
            let status = algorithm.allow(name).await.unwrap();
            assert!(!status.allowed, "{}: 6th request should be denied", name);
            assert!(
                status.retry_after > Duration::ZERO,
                "{}: denial should carry a retry hint",
                name
            );

            // All should respect key isolation
            let other = algorithm.allow(&format!("{}_other", name)).await.unwrap();
            assert!(other.allowed, "{}: different key should be allowed", name);

            // All should support reset
            algorithm.reset(name).await.unwrap();
            let after_reset = algorithm.allow(name).await.unwrap();
            assert!(
                after_reset.allowed,
                "{}: request after reset should be allowed",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_reset_of_unknown_key_is_a_no_op() {
        let clock = TestClock::new();
        for algorithm in local_algorithms(&clock) {
            assert!(algorithm.reset("never_seen").await.is_ok());
        }
    }

    #[test]
    fn test_retry_after_secs_rounds_up() {
        use crate::RateLimitStatus;

        assert_eq!(RateLimitStatus::allowed().retry_after_secs(), 0);
        assert_eq!(
            RateLimitStatus::denied(Duration::from_secs(2)).retry_after_secs(),
            2
        );
        assert_eq!(
            RateLimitStatus::denied(Duration::from_millis(9_500)).retry_after_secs(),
            10
        );
        assert_eq!(
            RateLimitStatus::denied(Duration::from_nanos(1)).retry_after_secs(),
            1
        );
    }
}
