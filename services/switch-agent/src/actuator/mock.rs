//! In-memory actuator for development and testing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

use super::{Actuator, ActuatorError, ActuatorState};

#[derive(Debug, Default)]
struct MockState {
    state: ActuatorState,
    transitions: Vec<ActuatorState>,
    fail: bool,
}

/// Mock actuator. Clones share state, so a test can keep one clone while
/// the controller owns another.
#[derive(Debug, Clone, Default)]
pub struct MockActuator {
    inner: Arc<Mutex<MockState>>,
}

impl MockActuator {
    /// Create a mock actuator that starts off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock actuator with the given initial state.
    pub fn with_state(state: ActuatorState) -> Self {
        let mock = Self::new();
        mock.lock().state = state;
        mock
    }

    /// Create a mock actuator whose transitions fail.
    pub fn failing() -> Self {
        let mock = Self::new();
        mock.lock().fail = true;
        mock
    }

    /// Current output state.
    pub fn state(&self) -> ActuatorState {
        self.lock().state
    }

    /// Every transition applied so far, in order.
    pub fn transitions(&self) -> Vec<ActuatorState> {
        self.lock().transitions.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&mut self, state: ActuatorState) -> Result<(), ActuatorError> {
        let mut inner = self.lock();
        if inner.fail {
            return Err(ActuatorError::Unavailable(
                "mock actuator configured to fail".to_string(),
            ));
        }
        info!(state = %state, "[MOCK] Setting actuator");
        inner.state = state;
        inner.transitions.push(state);
        Ok(())
    }
}

impl Actuator for MockActuator {
    fn name(&self) -> &str {
        "mock"
    }

    fn turn_on(&mut self) -> Result<(), ActuatorError> {
        self.set(ActuatorState::On)
    }

    fn turn_off(&mut self) -> Result<(), ActuatorError> {
        self.set(ActuatorState::Off)
    }

    fn read_state(&self) -> Result<ActuatorState, ActuatorError> {
        Ok(self.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_transitions() {
        let mut actuator = MockActuator::new();
        let observer = actuator.clone();

        actuator.turn_on().unwrap();
        actuator.turn_off().unwrap();

        assert_eq!(observer.state(), ActuatorState::Off);
        assert_eq!(
            observer.transitions(),
            vec![ActuatorState::On, ActuatorState::Off]
        );
    }

    #[test]
    fn test_mock_failing() {
        let mut actuator = MockActuator::failing();
        assert!(actuator.turn_on().is_err());
        assert_eq!(actuator.read_state().unwrap(), ActuatorState::Off);
        assert!(actuator.transitions().is_empty());
    }

    #[test]
    fn test_mock_initial_state() {
        let actuator = MockActuator::with_state(ActuatorState::On);
        assert_eq!(actuator.read_state().unwrap(), ActuatorState::On);
    }
}
