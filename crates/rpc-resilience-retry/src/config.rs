use crate::backoff::{BackoffPolicy, IntervalFunction};
use crate::events::RetryEvent;
use crate::{Attempt, RetryExecutor};
use rpc_resilience_core::events::{EventListeners, FnListener};
use rpc_resilience_core::{OutcomeCode, StatusCoded};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub(crate) type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Configuration for a [`RetryExecutor`].
pub struct RetryConfig<E> {
    pub(crate) name: String,
    pub(crate) max_attempts: usize,
    pub(crate) backoff: Arc<dyn IntervalFunction>,
    pub(crate) retry_predicate: Option<RetryPredicate<E>>,
    pub(crate) event_listeners: EventListeners<RetryEvent>,
}

impl<E> RetryConfig<E> {
    /// Creates a new configuration builder.
    pub fn builder() -> RetryConfigBuilder<E> {
        RetryConfigBuilder::new()
    }

    /// Maximum number of attempts, including the first.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// The executor's name, used in events and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `error` should be retried. Without a predicate, every error is.
    pub fn should_retry(&self, error: &E) -> bool {
        self.retry_predicate
            .as_ref()
            .map_or(true, |predicate| predicate(error))
    }

    /// The wait before retry number `retry` (1-indexed).
    pub fn next_backoff(&self, retry: usize) -> Duration {
        self.backoff.next_interval(retry)
    }
}

impl<E> std::fmt::Debug for RetryConfig<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("event_listeners", &self.event_listeners)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RetryConfig`].
pub struct RetryConfigBuilder<E> {
    name: String,
    max_attempts: usize,
    backoff: Option<Arc<dyn IntervalFunction>>,
    retry_predicate: Option<RetryPredicate<E>>,
    event_listeners: EventListeners<RetryEvent>,
}

impl<E> Default for RetryConfigBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryConfigBuilder<E> {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - max_attempts: 3
    /// - backoff: Exponential with a 100ms base
    /// - retry predicate: every error is retried
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            max_attempts: 3,
            backoff: None,
            retry_predicate: None,
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the maximum number of attempts.
    ///
    /// This includes the initial attempt, so max_attempts=4 means
    /// 1 initial attempt + 3 retries.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets a fixed backoff interval.
    pub fn fixed_backoff(self, delay: Duration) -> Self {
        self.backoff(BackoffPolicy::Fixed(delay))
    }

    /// Sets linear backoff: `step * n` before retry `n`.
    pub fn linear_backoff(self, step: Duration) -> Self {
        self.backoff(BackoffPolicy::Linear(step))
    }

    /// Sets exponential backoff: `base * 2^(n-1)` before retry `n`.
    pub fn exponential_backoff(self, base: Duration) -> Self {
        self.backoff(BackoffPolicy::Exponential(base))
    }

    /// Sets any interval function as the backoff.
    pub fn backoff<I>(mut self, interval_fn: I) -> Self
    where
        I: IntervalFunction + 'static,
    {
        self.backoff = Some(Arc::new(interval_fn));
        self
    }

    /// Sets a predicate to determine which errors should be retried.
    pub fn retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    /// Sets the name for this executor (used in events).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback invoked before each retry with the number of the
    /// attempt about to run and the delay before it.
    ///
    /// # Example
    /// ```rust,no_run
    /// use rpc_resilience_core::CallError;
    /// use rpc_resilience_retry::RetryConfig;
    /// use std::time::Duration;
    ///
    /// let executor = RetryConfig::<CallError>::builder()
    ///     .max_attempts(4)
    ///     .exponential_backoff(Duration::from_secs(2))
    ///     .on_retry(|attempt, delay| {
    ///         println!("attempt {attempt} in {delay:?}");
    ///     })
    ///     .build();
    /// ```
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Retry { attempt, delay, .. } = event {
                f(*attempt, *delay);
            }
        }));
        self
    }

    /// Registers a callback invoked after every attempt with its record.
    pub fn on_attempt<F>(mut self, f: F) -> Self
    where
        F: Fn(&Attempt) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::AttemptCompleted { attempt, .. } = event {
                f(attempt);
            }
        }));
        self
    }

    /// Registers a callback invoked when the operation succeeds, with the
    /// number of attempts it took.
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Success { attempts, .. } = event {
                f(*attempts);
            }
        }));
        self
    }

    /// Registers a callback invoked when every attempt has failed.
    pub fn on_exhausted<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Exhausted { attempts, .. } = event {
                f(*attempts);
            }
        }));
        self
    }

    /// Registers a callback invoked when an error is returned without retrying.
    pub fn on_ignored_error<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::IgnoredError { attempts, .. } = event {
                f(*attempts);
            }
        }));
        self
    }

    /// Builds the configuration.
    ///
    /// # Panics
    ///
    /// Panics if `max_attempts` is zero.
    pub fn build_config(self) -> RetryConfig<E> {
        if self.max_attempts == 0 {
            panic!("max_attempts must be at least 1");
        }

        RetryConfig {
            name: self.name,
            max_attempts: self.max_attempts,
            backoff: self.backoff.unwrap_or_else(|| {
                Arc::new(BackoffPolicy::Exponential(Duration::from_millis(100)))
            }),
            retry_predicate: self.retry_predicate,
            event_listeners: self.event_listeners,
        }
    }

    /// Builds the executor.
    ///
    /// # Panics
    ///
    /// Panics if `max_attempts` is zero.
    pub fn build(self) -> RetryExecutor<E> {
        RetryExecutor::new(self.build_config())
    }
}

impl<E> RetryConfigBuilder<E>
where
    E: StatusCoded + 'static,
{
    /// Retries only errors whose outcome code is in `codes`.
    ///
    /// Errors without a code are never retried.
    pub fn retry_on_codes<I>(self, codes: I) -> Self
    where
        I: IntoIterator<Item = OutcomeCode>,
    {
        let codes: BTreeSet<OutcomeCode> = codes.into_iter().collect();
        self.retry_on(move |error: &E| {
            error
                .outcome_code()
                .is_some_and(|code| codes.contains(&code))
        })
    }
}
