//! Sampling session state machine
//!
//! ```text
//! NotRunning --start/resume--> Running --stop--> NotRunning
//! ```
//!
//! Transitions are serialized by one mutex. They are rare, so blocking here is
//! fine; nothing on the context hot path touches it.

use crate::arguments::Arguments;
use crate::engine::NativeEngine;
use crate::error::{require_non_empty, ProfilerError, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    NotRunning,
    Running,
}

/// Owner of the session state; forwards validated transitions to the engine
pub struct SessionController {
    state: Mutex<SessionState>,
    engine: Arc<dyn NativeEngine>,
}

impl SessionController {
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self {
            state: Mutex::new(SessionState::NotRunning),
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a fresh session, discarding previously collected samples
    ///
    /// `interval <= 0` selects the engine's default for the event.
    pub fn start(&self, event: &str, interval: i64) -> Result<()> {
        let event = require_non_empty(event, "event")?;
        self.begin(&Arguments::for_event(event, interval), true)
    }

    /// Start a session that keeps previously collected samples
    pub fn resume(&self, event: &str, interval: i64) -> Result<()> {
        let event = require_non_empty(event, "event")?;
        self.begin(&Arguments::for_event(event, interval), false)
    }

    /// Start from parsed command arguments
    pub fn begin(&self, args: &Arguments, reset: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SessionState::Running {
            return Err(ProfilerError::InvalidState(
                "Profiler already started".to_string(),
            ));
        }
        self.engine.start(args, reset)?;
        *state = SessionState::Running;
        info!(
            event = args.event_name(),
            interval = args.event_interval(),
            reset,
            "Profiling started"
        );
        Ok(())
    }

    /// Stop the running session without dumping
    ///
    /// Samples still in flight may land after this returns.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SessionState::NotRunning {
            return Err(ProfilerError::InvalidState(
                "Profiler is not active".to_string(),
            ));
        }
        self.engine.stop()?;
        *state = SessionState::NotRunning;
        info!(samples = self.engine.total_samples(), "Profiling stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LocalEngine;
    use crate::ProfilerConfig;

    fn controller() -> SessionController {
        let engine = LocalEngine::new(ProfilerConfig::with_max_tid(crate::config::PID_MAX_LIMIT))
            .unwrap();
        SessionController::new(Arc::new(engine))
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(controller().state(), SessionState::NotRunning);
    }

    #[test]
    fn test_start_stop() {
        let session = controller();
        session.start("wall", 1_000_000).unwrap();
        assert_eq!(session.state(), SessionState::Running);
        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::NotRunning);
    }

    #[test]
    fn test_start_while_running_fails() {
        let session = controller();
        session.start("cpu", 0).unwrap();
        assert!(matches!(
            session.start("cpu", 0),
            Err(ProfilerError::InvalidState(_))
        ));
        assert!(matches!(
            session.resume("cpu", 0),
            Err(ProfilerError::InvalidState(_))
        ));
        session.stop().unwrap();
    }

    #[test]
    fn test_stop_while_stopped_fails() {
        let session = controller();
        assert!(matches!(session.stop(), Err(ProfilerError::InvalidState(_))));
    }

    #[test]
    fn test_empty_event_rejected() {
        let session = controller();
        assert!(matches!(
            session.start("", 1000),
            Err(ProfilerError::MissingArgument("event"))
        ));
        assert_eq!(session.state(), SessionState::NotRunning);
    }

    #[test]
    fn test_engine_failure_keeps_state() {
        let session = controller();
        assert!(session.start("cache-misses", 0).is_err());
        assert_eq!(session.state(), SessionState::NotRunning);
    }
}
