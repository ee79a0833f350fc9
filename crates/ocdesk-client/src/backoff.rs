use std::time::Duration;

use rand::Rng;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Wait between a lost connection and the next dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffPolicy {
    Fixed(Duration),
    /// Doubles from `initial` per failed attempt, capped at `max`. With
    /// `jitter` the wait is drawn uniformly from the upper half of that value.
    Exponential {
        initial: Duration,
        max: Duration,
        jitter: bool,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl BackoffPolicy {
    /// Delay before reconnect number `attempt`, counted from zero since the
    /// last successful connection.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed(delay) => *delay,
            BackoffPolicy::Exponential {
                initial,
                max,
                jitter,
            } => {
                let factor = 1u32 << attempt.min(16);
                let base = initial.saturating_mul(factor).min(*max);
                if *jitter && !base.is_zero() {
                    let ms = base.as_millis() as u64;
                    Duration::from_millis(rand::thread_rng().gen_range(ms / 2..=ms))
                } else {
                    base
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_five_second_fixed_delay() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(5));
        assert_eq!(policy.delay(40), Duration::from_secs(5));
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let policy = BackoffPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
            jitter: false,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_secs(2));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_in_upper_half() {
        let policy = BackoffPolicy::Exponential {
            initial: Duration::from_millis(400),
            max: Duration::from_secs(10),
            jitter: true,
        };
        for _ in 0..50 {
            let d = policy.delay(1);
            assert!(d >= Duration::from_millis(400) && d <= Duration::from_millis(800));
        }
    }
}
