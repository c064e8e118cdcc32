//! 🔄 Backoff: how long to sulk before trying again.
//!
//! One policy for every HTTP call this crate makes, bulk or settings. The delay is a
//! pure function of the attempt number (plus a jitter sample you hand in), and the
//! retry decision is a pure predicate over the failure class. No hidden clocks,
//! no hidden dice. Tests can poke it directly. 🦆

use std::time::Duration;

/// 📐 Max attempts, base delay, cap, jitter on/off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always >= 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

/// 🏷️ What kind of failure a single HTTP attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureClass {
    /// 🔌 Could not connect, or the connection died mid-request.
    Connect,
    /// ⏱️ The per-attempt timeout fired.
    Timeout,
    /// 📡 The server answered, with this status.
    Status(u16),
    /// 🤷 Anything else: a malformed URL, a body that would not build. Retrying will not help.
    Other,
}

impl RetryPolicy {
    /// 📈 Exponential delay before retry number `attempt` (1 = the wait after the first failure).
    ///
    /// `base * 2^(attempt-1)`, capped at `max_delay`. With jitter on, the result lands in
    /// `[d/2, d]`, driven by `jitter_sample` in `[0, 1)`.
    pub fn delay_for(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let uncapped = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);
        let capped = uncapped.min(self.max_delay);
        if !self.jitter {
            return capped;
        }
        // -- 🎲 equal jitter: keep half, randomize the other half. thundering herds hate this one trick.
        let half = capped / 2;
        half + half.mul_f64(jitter_sample.clamp(0.0, 1.0))
    }

    /// 🎲 [`delay_for`](Self::delay_for) with a fresh random jitter sample.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.delay_for(attempt, rand::random::<f64>())
    }

    /// 🔁 May we try again after `attempts_made` attempts ended in `class`?
    pub fn should_retry(&self, class: &FailureClass, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts && is_transient(class)
    }
}

/// 🌦️ Transient = worth another go. Connection trouble, timeouts, 5xx, and 429 (the cluster
/// asking us, politely, to calm down).
pub fn is_transient(class: &FailureClass) -> bool {
    match class {
        FailureClass::Connect | FailureClass::Timeout => true,
        FailureClass::Status(status) => *status == 429 || (500..600).contains(status),
        FailureClass::Other => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter: false,
        }
    }

    #[test]
    fn the_one_where_the_delay_doubles_until_it_hits_the_ceiling() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(1, 0.0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, 0.0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, 0.0), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4, 0.0), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5, 0.0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(64, 0.0), Duration::from_millis(1000));
    }

    #[test]
    fn the_one_where_jitter_stays_inside_its_lane() {
        let policy = RetryPolicy {
            jitter: true,
            ..no_jitter()
        };
        assert_eq!(policy.delay_for(3, 0.0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, 1.0), Duration::from_millis(400));
        for _ in 0..100 {
            let delay = policy.next_delay(2);
            assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(200));
        }
    }

    #[test]
    fn the_one_where_only_transient_failures_get_a_second_chance() {
        let policy = no_jitter();
        assert!(policy.should_retry(&FailureClass::Connect, 1));
        assert!(policy.should_retry(&FailureClass::Timeout, 3));
        assert!(policy.should_retry(&FailureClass::Status(503), 1));
        assert!(policy.should_retry(&FailureClass::Status(429), 1));
        assert!(!policy.should_retry(&FailureClass::Status(400), 1));
        assert!(!policy.should_retry(&FailureClass::Status(404), 1));
        assert!(!policy.should_retry(&FailureClass::Other, 1));
        // 🧱 the bound is the bound
        assert!(!policy.should_retry(&FailureClass::Status(503), 4));
    }
}
