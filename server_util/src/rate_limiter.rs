// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::{Duration, Instant};

/// A rate limiter that may have unique properties.
pub struct RateLimiter {
    props: RateLimiterProps,
    state: RateLimiterState,
}

/// A [`u32`] is chosen for being the widest type that doesn't increase the size of
/// [`RateLimiterState`] or [`RateLimiterProps`] on a 64-bit system, and it is natively accepted
/// by [`Duration::saturating_mul`].
pub type Units = u32;

/// The state of a rate limiter.
#[derive(Default)]
pub struct RateLimiterState {
    until: Option<Instant>,
    burst_used: Units,
}

/// The (sharable) properties of a rate limiter.
#[derive(Copy, Clone)]
pub struct RateLimiterProps {
    rate_limit: Duration,
    burst: Units,
}

impl RateLimiterState {
    pub fn should_limit_rate(&mut self, props: &RateLimiterProps) -> bool {
        self.should_limit_rate_with_now_and_usage(props, Instant::now(), 1)
    }

    pub fn should_limit_rate_with_now_and_usage(
        &mut self,
        props: &RateLimiterProps,
        now: Instant,
        usage: Units,
    ) -> bool {
        if props.rate_limit == Duration::ZERO {
            return false;
        }

        let ok = match self.until {
            Some(until) if now <= until => {
                if self.burst_used.saturating_add(usage) <= props.burst {
                    self.burst_used = self.burst_used.saturating_add(usage);
                    true
                } else {
                    false
                }
            }
            _ => {
                self.burst_used = 0;
                true
            }
        };

        if ok {
            let base = self.until.filter(|u| *u > now).unwrap_or(now);
            self.until = base.checked_add(props.rate_limit.saturating_mul(usage));
        }

        !ok
    }
}

impl RateLimiterProps {
    /// `rate_limit` should be more than zero; use [`Self::no_limit`] to opt out explicitly.
    pub fn new(rate_limit: Duration, burst: Units) -> Self {
        debug_assert!(rate_limit != Duration::ZERO);
        Self { rate_limit, burst }
    }

    pub fn no_limit() -> Self {
        Self {
            rate_limit: Duration::ZERO,
            burst: 0,
        }
    }
}

impl RateLimiter {
    pub fn new(rate_limit: Duration, burst: Units) -> Self {
        Self::from(RateLimiterProps::new(rate_limit, burst))
    }

    pub fn no_limit() -> Self {
        Self::from(RateLimiterProps::no_limit())
    }

    pub fn should_limit_rate(&mut self) -> bool {
        self.state.should_limit_rate(&self.props)
    }
}

impl From<RateLimiterProps> for RateLimiter {
    fn from(props: RateLimiterProps) -> Self {
        Self {
            props,
            state: RateLimiterState::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn limit_exceeded() {
        let mut rate_limiter = RateLimiter::new(Duration::from_millis(10), 3);

        assert!(!rate_limiter.should_limit_rate());
        assert!(!rate_limiter.should_limit_rate());
        assert!(!rate_limiter.should_limit_rate());
        assert!(!rate_limiter.should_limit_rate());
        assert!(rate_limiter.should_limit_rate());

        std::thread::sleep(Duration::from_millis(50));

        assert!(!rate_limiter.should_limit_rate());
    }

    #[test]
    fn no_limit() {
        let mut rate_limiter = RateLimiter::no_limit();
        for _ in 0..1000 {
            assert!(!rate_limiter.should_limit_rate());
        }
    }
}
