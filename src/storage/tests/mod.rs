// src/storage/tests/mod.rs


// Common utilities for storage tests
pub(crate) mod common {
    use std::time::Duration;

    use crate::storage::BucketState;

    /// Minimal per-key state: a hit counter stamped with the last hit time
    #[derive(Debug, Default)]
    pub struct HitCounter {
        pub hits: u64,
        pub last_hit: Duration,
    }

    impl HitCounter {
        pub fn at(now: Duration) -> Self {
            Self {
                hits: 0,
                last_hit: now,
            }
        }

        pub fn hit(&mut self, now: Duration) -> u64 {
            self.hits += 1;
            self.last_hit = now;
            self.hits
        }
    }

    impl BucketState for HitCounter {
        fn last_activity(&self) -> Duration {
            self.last_hit
        }
    }
}
