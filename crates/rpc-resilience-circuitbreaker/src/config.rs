use crate::events::CircuitBreakerEvent;
use crate::CircuitState;
use rpc_resilience_core::{EventListeners, FnListener};
use std::time::Duration;

/// Configuration for a circuit breaker.
///
/// Immutable once built; shared by every clone of the breaker.
#[derive(Debug)]
pub struct CircuitBreakerConfig {
    pub(crate) name: String,
    pub(crate) failure_ratio_threshold: f64,
    pub(crate) minimum_request_volume: usize,
    pub(crate) open_duration: Duration,
    pub(crate) max_half_open_requests: usize,
    pub(crate) counting_interval: Option<Duration>,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
}

impl CircuitBreakerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// The breaker's name, used in events and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ratio of failures to requests above which a closed circuit opens.
    pub fn failure_ratio_threshold(&self) -> f64 {
        self.failure_ratio_threshold
    }

    /// Requests that must be recorded before the ratio is evaluated.
    pub fn minimum_request_volume(&self) -> usize {
        self.minimum_request_volume
    }

    /// How long the circuit stays open before probing.
    pub fn open_duration(&self) -> Duration {
        self.open_duration
    }

    /// Probe calls admitted per half-open episode.
    pub fn max_half_open_requests(&self) -> usize {
        self.max_half_open_requests
    }
}

/// Builder for [`CircuitBreaker`](crate::CircuitBreaker).
pub struct CircuitBreakerConfigBuilder {
    name: String,
    failure_ratio_threshold: f64,
    minimum_request_volume: usize,
    open_duration: Duration,
    max_half_open_requests: usize,
    counting_interval: Option<Duration>,
    event_listeners: EventListeners<CircuitBreakerEvent>,
}

impl CircuitBreakerConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            failure_ratio_threshold: 0.5,
            minimum_request_volume: 10,
            open_duration: Duration::from_secs(30),
            max_half_open_requests: 1,
            counting_interval: None,
            event_listeners: EventListeners::new(),
        }
    }

    /// Give this breaker a human-readable name for observability.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, n: N) -> Self {
        self.name = n.into();
        self
    }

    /// Sets the failure ratio above which the circuit opens.
    ///
    /// The comparison is strict: with a threshold of 0.5, exactly half the
    /// requests failing keeps the circuit closed.
    ///
    /// Default: 0.5
    pub fn failure_ratio_threshold(mut self, ratio: f64) -> Self {
        self.failure_ratio_threshold = ratio;
        self
    }

    /// Sets how many requests must be recorded before the ratio is evaluated.
    ///
    /// Default: 10
    pub fn minimum_request_volume(mut self, n: usize) -> Self {
        self.minimum_request_volume = n;
        self
    }

    /// Sets how long the circuit stays open before admitting probes.
    ///
    /// Default: 30 seconds
    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }

    /// Sets how many probe calls a half-open circuit admits.
    ///
    /// The circuit closes once this many probes have succeeded; any probe
    /// failure re-opens it.
    ///
    /// Default: 1
    pub fn max_half_open_requests(mut self, n: usize) -> Self {
        self.max_half_open_requests = n;
        self
    }

    /// Clears the counters of a closed circuit every `interval`.
    ///
    /// Without an interval the counters accumulate until the next state
    /// transition.
    ///
    /// Default: None
    pub fn counting_interval(mut self, interval: Duration) -> Self {
        self.counting_interval = Some(interval);
        self
    }

    /// Registers a callback invoked on every state transition with
    /// `(name, from, to)`.
    ///
    /// The callback runs after the breaker has released its lock. A panic in
    /// the callback is caught and never reaches the caller.
    ///
    /// # Example
    /// ```rust
    /// use rpc_resilience_circuitbreaker::{CircuitBreakerConfig, CircuitState};
    ///
    /// let breaker = CircuitBreakerConfig::builder()
    ///     .name("resiliency")
    ///     .on_state_transition(|name, from, to| {
    ///         println!("{name}: {from:?} -> {to:?}");
    ///         if to == CircuitState::Open {
    ///             println!("calls will be rejected");
    ///         }
    ///     })
    ///     .build();
    /// assert_eq!(breaker.state(), CircuitState::Closed);
    /// ```
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::StateTransition {
                    pattern_name,
                    from_state,
                    to_state,
                    ..
                } = event
                {
                    f(pattern_name, *from_state, *to_state);
                }
            }));
        self
    }

    /// Registers a callback invoked when a call is admitted, with the state
    /// it was admitted in.
    pub fn on_call_permitted<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::CallPermitted { state, .. } = event {
                    f(*state);
                }
            }));
        self
    }

    /// Registers a callback invoked when a call is rejected.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if matches!(event, CircuitBreakerEvent::CallRejected { .. }) {
                    f();
                }
            }));
        self
    }

    /// Registers a callback receiving every event as it is emitted.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Registers a callback invoked for every recorded outcome with
    /// `(succeeded, duration)`, stale outcomes included.
    pub fn on_outcome<F>(mut self, f: F) -> Self
    where
        F: Fn(bool, Duration) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::OutcomeRecorded {
                    outcome, duration, ..
                } = event
                {
                    f(outcome.is_success(), *duration);
                }
            }));
        self
    }

    /// Builds the configuration without constructing a breaker.
    ///
    /// # Panics
    ///
    /// Panics if the failure ratio threshold is outside `0.0..=1.0` or if
    /// `max_half_open_requests` is zero.
    pub fn build_config(self) -> CircuitBreakerConfig {
        if !(0.0..=1.0).contains(&self.failure_ratio_threshold) {
            panic!("failure_ratio_threshold must be within 0.0..=1.0");
        }
        if self.max_half_open_requests == 0 {
            panic!("max_half_open_requests must be at least 1");
        }

        CircuitBreakerConfig {
            name: self.name,
            failure_ratio_threshold: self.failure_ratio_threshold,
            minimum_request_volume: self.minimum_request_volume,
            open_duration: self.open_duration,
            max_half_open_requests: self.max_half_open_requests,
            counting_interval: self.counting_interval,
            event_listeners: self.event_listeners,
        }
    }

    /// Builds the circuit breaker.
    ///
    /// # Panics
    ///
    /// See [`build_config`](Self::build_config).
    pub fn build(self) -> crate::CircuitBreaker {
        crate::CircuitBreaker::new(self.build_config())
    }
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
