//! Per-tool circuit breaker (§4.6b), matching the closed/open/half-open
//! pattern the agent-runtime crate already applies to its own tool dispatch.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct ToolCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl Default for ToolCircuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Tracks failure streaks per tool name and trips a breaker once a
/// threshold is reached. An open breaker stays open for `reset_after`
/// before allowing one half-open probe through.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_after: Duration,
    circuits: Mutex<HashMap<String, ToolCircuit>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_after: Duration) -> Self {
        Self {
            failure_threshold,
            reset_after,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a call to `tool` is currently allowed. A half-open probe is
    /// allowed through exactly once until it reports back via
    /// [`Self::record_success`] or [`Self::record_failure`].
    pub fn allow(&self, tool: &str) -> bool {
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(tool.to_string()).or_default();
        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = circuit.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.reset_after {
                    circuit.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, tool: &str) {
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(tool.to_string()).or_default();
        circuit.state = CircuitState::Closed;
        circuit.consecutive_failures = 0;
        circuit.opened_at = None;
    }

    pub fn record_failure(&self, tool: &str) {
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(tool.to_string()).or_default();
        circuit.consecutive_failures += 1;
        if circuit.state == CircuitState::HalfOpen || circuit.consecutive_failures >= self.failure_threshold {
            circuit.state = CircuitState::Open;
            circuit.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self, tool: &str) -> CircuitState {
        self.circuits
            .lock()
            .get(tool)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_open_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..2 {
            breaker.record_failure("fetch_github_file");
        }
        assert_eq!(breaker.state("fetch_github_file"), CircuitState::Closed);
        breaker.record_failure("fetch_github_file");
        assert_eq!(breaker.state("fetch_github_file"), CircuitState::Open);
        assert!(!breaker.allow("fetch_github_file"));
    }

    #[test]
    fn half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1));
        breaker.record_failure("query_db");
        assert_eq!(breaker.state("query_db"), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.allow("query_db"));
        assert_eq!(breaker.state("query_db"), CircuitState::HalfOpen);
        breaker.record_success("query_db");
        assert_eq!(breaker.state("query_db"), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_reopens_on_failure() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1));
        breaker.record_failure("query_db");
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.allow("query_db"));
        breaker.record_failure("query_db");
        assert_eq!(breaker.state("query_db"), CircuitState::Open);
    }

    #[test]
    fn unknown_tool_defaults_closed() {
        let breaker = CircuitBreaker::default();
        assert_eq!(breaker.state("never_called"), CircuitState::Closed);
        assert!(breaker.allow("never_called"));
    }
}
