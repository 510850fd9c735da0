//! Event logging capability used by the endpoint
//!
//! The endpoint reports its lifecycle through [`EventLog`] rather than calling
//! `tracing` directly, so embedders can route or capture those events.
//! [`TracingLog`] is the default implementation.

use std::time::Duration;

use crate::protocol::CallRequest;

pub trait EventLog: Send + Sync {
    /// Routine event
    fn log_event(&self, message: &str);

    /// Notable state change
    fn log_notification(&self, message: &str);

    /// Degraded but still working
    fn log_warning(&self, message: &str);

    fn log_error(&self, message: &str);

    fn log_session_bound(&self, session_id: &str, recovered: bool) {
        if recovered {
            self.log_notification(&format!("Session {} recovered", session_id));
        } else {
            self.log_notification(&format!("Session {} established", session_id));
        }
    }

    fn log_call(&self, request: &CallRequest) {
        self.log_event(&format!(
            "Call {} {}.{} (attempt {}, {} params)",
            request.call_id,
            request.object_id,
            request.method_name,
            request.attempt_number,
            request.parameters.len()
        ));
    }

    fn log_recovery_step(&self, step: u32, max_steps: u32, delay: Duration) {
        self.log_warning(&format!(
            "Recovery attempt {}/{} after {} ms",
            step,
            max_steps,
            delay.as_millis()
        ));
    }

    fn log_vitality(&self, alive: bool) {
        if alive {
            self.log_notification("Connection vitality restored");
        } else {
            self.log_warning("Connection vitality lost");
        }
    }
}

/// [`EventLog`] backed by `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl EventLog for TracingLog {
    fn log_event(&self, message: &str) {
        tracing::debug!(target: "orc", "{}", message);
    }

    fn log_notification(&self, message: &str) {
        tracing::info!(target: "orc", "{}", message);
    }

    fn log_warning(&self, message: &str) {
        tracing::warn!(target: "orc", "{}", message);
    }

    fn log_error(&self, message: &str) {
        tracing::error!(target: "orc", "{}", message);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Captures events for assertions
    #[derive(Debug, Default)]
    pub struct RecordingLog {
        pub entries: Mutex<Vec<(&'static str, String)>>,
    }

    impl RecordingLog {
        pub fn contains(&self, level: &str, needle: &str) -> bool {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .any(|(l, m)| *l == level && m.contains(needle))
        }
    }

    impl EventLog for RecordingLog {
        fn log_event(&self, message: &str) {
            self.entries.lock().unwrap().push(("event", message.to_string()));
        }

        fn log_notification(&self, message: &str) {
            self.entries.lock().unwrap().push(("notification", message.to_string()));
        }

        fn log_warning(&self, message: &str) {
            self.entries.lock().unwrap().push(("warning", message.to_string()));
        }

        fn log_error(&self, message: &str) {
            self.entries.lock().unwrap().push(("error", message.to_string()));
        }
    }

    #[test]
    fn test_convenience_methods_route_to_levels() {
        let log = RecordingLog::default();
        log.log_session_bound("S1", true);
        log.log_vitality(false);
        log.log_recovery_step(2, 10, Duration::from_millis(500));

        assert!(log.contains("notification", "Session S1 recovered"));
        assert!(log.contains("warning", "vitality lost"));
        assert!(log.contains("warning", "2/10 after 500 ms"));
    }
}
