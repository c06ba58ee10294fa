// src/algorithms/tests/sliding_window_tests.rs

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::algorithms::{RateLimitAlgorithm, SlidingWindow};
    use crate::config::SlidingWindowConfig;
    use crate::test_utils::{shared, TestClock};

    /// 5 requests per 10s window, five 2s sub-windows
    fn window(clock: &Arc<TestClock>) -> SlidingWindow {
        let config = SlidingWindowConfig {
            rate: 5,
            window: Duration::from_secs(10),
            sub_window: Duration::from_secs(2),
            cleanup_interval: Duration::from_secs(60),
        };
        SlidingWindow::with_clock(config, shared(clock)).unwrap()
    }

    #[tokio::test]
    async fn test_denies_after_rate_and_reports_roll_out() {
        let clock = TestClock::starting_at(Duration::from_millis(1_000_500));
        let limiter = window(&clock);
        assert_eq!(limiter.num_sub_windows(), 5);

        for i in 0..5 {
            let status = limiter.allow("user").await.unwrap();
            assert!(status.allowed, "Request {} should be allowed", i);
        }

        // all five sit in sub-window [1000s, 1002s), which leaves the window at 1010s
        let status = limiter.allow("user").await.unwrap();
        assert!(!status.allowed);
        assert_eq!(status.retry_after, Duration::from_millis(9_500));
        assert_eq!(status.retry_after_secs(), 10);

        clock.set(Duration::from_millis(1_009_999));
        assert!(!limiter.allow("user").await.unwrap().allowed);

        clock.set(Duration::from_secs(1_010));
        assert!(limiter.allow("user").await.unwrap().allowed);
    }

    /// A burst at the end of one window plus one at the start of the next
    /// cannot exceed `rate`, unlike a fixed window.
    #[tokio::test]
    async fn test_no_double_burst_at_boundary() {
        let clock = TestClock::starting_at(Duration::from_millis(1_009_500));
        let limiter = window(&clock);

        for _ in 0..5 {
            assert!(limiter.check("edge").allowed);
        }

        clock.set(Duration::from_secs(1_010));
        let status = limiter.check("edge");
        assert!(!status.allowed, "new fixed window would have reset here");
        assert_eq!(status.retry_after, Duration::from_secs(8));

        clock.set(Duration::from_millis(1_017_900));
        assert!(!limiter.check("edge").allowed);

        clock.set(Duration::from_secs(1_018));
        assert!(limiter.check("edge").allowed);
    }

    /// Requests spread over several sub-windows roll out oldest first
    #[tokio::test]
    async fn test_counts_roll_out_per_sub_window() {
        let clock = TestClock::starting_at(Duration::from_secs(2_000));
        let limiter = window(&clock);

        // 2 at 2000s, 3 at 2004s
        assert!(limiter.check("spread").allowed);
        assert!(limiter.check("spread").allowed);
        clock.set(Duration::from_secs(2_004));
        for _ in 0..3 {
            assert!(limiter.check("spread").allowed);
        }

        let status = limiter.check("spread");
        assert!(!status.allowed);
        assert_eq!(status.retry_after, Duration::from_secs(6));

        // the pair from 2000s is gone, the 2004s triple is not
        clock.set(Duration::from_secs(2_010));
        assert!(limiter.check("spread").allowed);
        assert!(limiter.check("spread").allowed);
        assert!(!limiter.check("spread").allowed);
    }

    /// After a full window of silence every counter is cleared
    #[tokio::test]
    async fn test_long_gap_clears_window() {
        let clock = TestClock::starting_at(Duration::from_secs(3_000));
        let limiter = window(&clock);

        for _ in 0..5 {
            assert!(limiter.check("gap").allowed);
        }
        assert!(!limiter.check("gap").allowed);

        clock.advance(Duration::from_secs(3_600));
        for _ in 0..5 {
            assert!(limiter.check("gap").allowed);
        }
    }

    /// Keys idle for a whole window are dropped
    #[tokio::test]
    async fn test_idle_key_evicted_after_window() {
        let clock = TestClock::starting_at(Duration::from_secs(4_000));
        let limiter = window(&clock);
        assert_eq!(limiter.store().idle_timeout(), Duration::from_secs(10));

        limiter.check("gone");
        clock.advance(Duration::from_secs(11));
        assert_eq!(limiter.store().evict_idle(), 1);
        assert!(limiter.store().is_empty());
    }

    #[tokio::test]
    async fn test_window_smaller_than_sub_window_is_rejected() {
        let clock = TestClock::new();
        let config = SlidingWindowConfig {
            rate: 5,
            window: Duration::from_secs(1),
            sub_window: Duration::from_secs(2),
            cleanup_interval: Duration::from_secs(60),
        };
        assert!(SlidingWindow::with_clock(config, shared(&clock)).is_err());
    }
}
