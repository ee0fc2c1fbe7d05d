use std::fmt;
use std::time::Duration;

/// Computes the wait before a retry.
///
/// `retry` is 1-indexed: `next_interval(1)` is the wait between the first and
/// second attempts. The first attempt never waits.
pub trait IntervalFunction: Send + Sync + fmt::Debug {
    /// Computes the delay before retry number `retry`.
    fn next_interval(&self, retry: usize) -> Duration;
}

/// How long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// The same delay before every retry.
    Fixed(Duration),
    /// `step * n` before retry `n`.
    Linear(Duration),
    /// `base * 2^(n-1)` before retry `n`.
    Exponential(Duration),
}

impl BackoffPolicy {
    /// Randomises every computed delay by up to `±fraction` of its value.
    ///
    /// `fraction` is clamped to `0.0..=1.0`.
    pub fn with_jitter(self, fraction: f64) -> Jittered<Self> {
        Jittered::new(self, fraction)
    }
}

impl IntervalFunction for BackoffPolicy {
    fn next_interval(&self, retry: usize) -> Duration {
        let n = retry.max(1);
        match *self {
            BackoffPolicy::Fixed(delay) => delay,
            BackoffPolicy::Linear(step) => {
                step.saturating_mul(u32::try_from(n).unwrap_or(u32::MAX))
            }
            BackoffPolicy::Exponential(base) => {
                // Past 2^31 the delay is meaningless anyway; saturate.
                let shift = u32::try_from(n - 1).unwrap_or(u32::MAX).min(31);
                base.saturating_mul(1u32 << shift)
            }
        }
    }
}

/// Wraps an interval function and spreads its delays uniformly within
/// `[d * (1 - fraction), d * (1 + fraction)]`.
#[derive(Debug, Clone)]
pub struct Jittered<I> {
    inner: I,
    fraction: f64,
}

impl<I> Jittered<I> {
    /// Wraps `inner`, clamping `fraction` to `0.0..=1.0`.
    pub fn new(inner: I, fraction: f64) -> Self {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        Self { inner, fraction }
    }

    /// The jitter fraction.
    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// The wrapped interval function.
    pub fn inner(&self) -> &I {
        &self.inner
    }
}

impl<I: IntervalFunction> IntervalFunction for Jittered<I> {
    fn next_interval(&self, retry: usize) -> Duration {
        use rand::Rng;

        let interval = self.inner.next_interval(retry);
        let base = interval.as_secs_f64();
        let delta = base * self.fraction;
        if delta <= 0.0 {
            return interval;
        }
        let secs = rand::rng().random_range((base - delta)..=(base + delta));
        // Saturates like the unjittered policies.
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// A custom interval function from a closure.
pub struct FnInterval<F> {
    f: F,
}

impl<F> FnInterval<F>
where
    F: Fn(usize) -> Duration + Send + Sync,
{
    /// Creates an interval function from `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnInterval<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInterval").finish_non_exhaustive()
    }
}

impl<F> IntervalFunction for FnInterval<F>
where
    F: Fn(usize) -> Duration + Send + Sync,
{
    fn next_interval(&self, retry: usize) -> Duration {
        (self.f)(retry)
    }
}
