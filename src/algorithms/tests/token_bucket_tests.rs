// src/algorithms/tests/token_bucket_tests.rs

#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;

    use crate::algorithms::{RateLimitAlgorithm, TokenBucket};
    use crate::config::TokenBucketConfig;
    use crate::error::RateLimiterError;
    use crate::test_utils::{shared, TestClock};

    fn config(rate: f64, capacity: f64) -> TokenBucketConfig {
        TokenBucketConfig {
            rate,
            capacity,
            cleanup_interval: Duration::from_secs(60),
        }
    }

    fn bucket(rate: f64, capacity: f64, clock: &Arc<TestClock>) -> TokenBucket {
        TokenBucket::with_clock(config(rate, capacity), shared(clock)).unwrap()
    }

    /// Burst up to capacity, then one token per second
    #[tokio::test]
    async fn test_burst_then_refill() {
        let clock = TestClock::new();
        let limiter = bucket(1.0, 3.0, &clock);

        for i in 0..3 {
            let status = limiter.allow("user").await.unwrap();
            assert!(status.allowed, "Request {} should be allowed", i);
        }

        let status = limiter.allow("user").await.unwrap();
        assert!(!status.allowed, "4th request should be denied");
        assert_eq!(status.retry_after, Duration::from_secs(1));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("user").await.unwrap().allowed);
        assert!(!limiter.allow("user").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_first_request_creates_bucket_minus_one_token() {
        let clock = TestClock::new();
        let limiter = bucket(1.0, 3.0, &clock);

        assert!(limiter.check("fresh").allowed);
        let tokens = limiter
            .store()
            .with_state("fresh", || unreachable!(), |state, _| state.tokens);
        assert_eq!(tokens, 2.0);
    }

    /// Retry hints are whole seconds, rounded up
    #[tokio::test]
    async fn test_retry_after_rounds_up_to_whole_seconds() {
        let clock = TestClock::new();
        let limiter = bucket(0.5, 1.0, &clock);

        assert!(limiter.check("slow").allowed);

        // one token takes 2s at 0.5/s
        let status = limiter.check("slow");
        assert_eq!(status.retry_after, Duration::from_secs(2));

        clock.advance(Duration::from_millis(500));
        let status = limiter.check("slow");
        assert!(!status.allowed);
        assert_eq!(status.retry_after, Duration::from_secs(2), "1.5s rounds up to 2s");

        clock.advance(Duration::from_millis(1_500));
        assert!(limiter.check("slow").allowed);
    }

    /// Waiting out the retry hint is always enough
    #[tokio::test]
    async fn test_waiting_retry_after_admits() {
        let clock = TestClock::new();
        let limiter = bucket(3.0, 2.0, &clock);

        for _ in 0..5 {
            while limiter.check("waiter").allowed {}
            let denied = limiter.check("waiter");
            assert!(!denied.allowed);
            clock.advance(denied.retry_after);
            assert!(
                limiter.check("waiter").allowed,
                "request after waiting {:?} should be allowed",
                denied.retry_after
            );
        }
    }

    /// Over any interval T no more than capacity + rate * T are admitted
    #[tokio::test]
    async fn test_admissions_bounded_by_capacity_plus_rate() {
        let clock = TestClock::new();
        let limiter = bucket(1.0, 3.0, &clock);

        let step = Duration::from_millis(250);
        let mut admitted = 0;
        for _ in 0..=40 {
            if limiter.check("steady").allowed {
                admitted += 1;
            }
            clock.advance(step);
        }

        // 41 requests over exactly 10 seconds
        assert!(admitted <= 13, "admitted {} > capacity + rate * T", admitted);
        assert!(admitted >= 10, "admitted {} < rate * T", admitted);
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let clock = TestClock::new();
        let limiter = bucket(1.0, 1.0, &clock);

        assert!(limiter.check("alice").allowed);
        assert!(!limiter.check("alice").allowed);
        assert!(limiter.check("bob").allowed, "other keys keep their own bucket");
    }

    /// An evicted key starts over with a full bucket
    #[tokio::test]
    async fn test_idle_key_is_evicted_and_starts_fresh() {
        let clock = TestClock::new();
        let limiter = bucket(0.01, 2.0, &clock);

        assert!(limiter.check("idle").allowed);
        assert!(limiter.check("idle").allowed);
        assert!(!limiter.check("idle").allowed);

        clock.advance(Duration::from_secs(30));
        assert_eq!(limiter.store().evict_idle(), 0, "not idle long enough");

        clock.advance(Duration::from_secs(31));
        assert_eq!(limiter.store().evict_idle(), 1);
        assert!(!limiter.store().contains("idle"));

        assert!(limiter.check("idle").allowed);
        assert!(limiter.check("idle").allowed);
    }

    /// A clock stepping backwards never adds tokens
    #[tokio::test]
    async fn test_clock_going_backwards_adds_nothing() {
        let clock = TestClock::new();
        let limiter = bucket(1.0, 1.0, &clock);

        assert!(limiter.check("skew").allowed);
        clock.set(Duration::from_secs(1_600_000_000));
        assert!(!limiter.check("skew").allowed);
    }

    /// Concurrent requests on one key never spend more than capacity
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_respect_capacity() {
        let clock = TestClock::new();
        let limiter = Arc::new(bucket(0.001, 10.0, &clock));
        let barrier = Arc::new(Barrier::new(50));

        let handles = (0..50).map(|_| {
            let limiter = Arc::clone(&limiter);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                limiter.allow("hot").await.unwrap().allowed
            })
        });

        let admitted = join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(admitted, 10, "exactly capacity requests should get through");
    }

    #[tokio::test]
    async fn test_invalid_parameters_are_rejected() {
        let clock = TestClock::new();

        let zero_rate = TokenBucket::with_clock(config(0.0, 3.0), shared(&clock));
        assert!(matches!(zero_rate, Err(RateLimiterError::Config(_))));

        let zero_capacity = TokenBucket::with_clock(config(1.0, 0.0), shared(&clock));
        assert!(matches!(zero_capacity, Err(RateLimiterError::Config(_))));
    }

    /// A capacity below one token could never refill enough to admit again
    #[tokio::test]
    async fn test_fractional_capacity_is_rejected() {
        let clock = TestClock::new();

        let half = TokenBucket::with_clock(config(1.0, 0.5), shared(&clock));
        assert!(matches!(half, Err(RateLimiterError::Config(_))));

        let limiter = bucket(1.0, 1.0, &clock);
        for round in 0..3 {
            assert!(limiter.check("single").allowed, "round {} should admit", round);
            let denied = limiter.check("single");
            assert!(!denied.allowed);
            assert_eq!(denied.retry_after, Duration::from_secs(1));
            clock.advance(denied.retry_after);
        }
    }

    #[test]
    fn test_construction_outside_runtime_fails() {
        let result = TokenBucket::new(config(1.0, 1.0));
        assert!(matches!(result, Err(RateLimiterError::Config(_))));
    }
}
