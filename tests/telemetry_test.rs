//! Integration tests for telemetry initialization and span helpers.

use std::io;
use std::sync::{Arc, Mutex};

use beseri_rs::model::{State, TaskId};
use beseri_rs::telemetry::{TelemetryConfig, init_telemetry, task};
use tracing_subscriber::layer::SubscriberExt as _;

/// Shared buffer the fmt layer writes into.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` under a scoped subscriber and return everything it logged.
fn capture(f: impl FnOnce()) -> String {
    let out = Captured::default();
    let writer = out.clone();
    let subscriber = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .with_writer(move || writer.clone())
            .with_ansi(false),
    );
    tracing::subscriber::with_default(subscriber, f);
    out.text()
}

#[test]
fn telemetry_initializes_without_endpoint() {
    // The only test in this binary that installs the global subscriber.
    let guard = init_telemetry(TelemetryConfig {
        endpoint: None,
        service_name: "beseri-test".to_string(),
        log_level: "debug".to_string(),
    });
    assert!(guard.is_ok());
}

#[test]
fn task_span_records_transitions() {
    let id = TaskId::from("t-42");
    let logs = capture(|| {
        let span = task::start_task_span("heavy_compute", &id, 1);
        task::record_state_transition(&span, State::Queued, State::InFlight);
        task::record_state_transition(&span, State::InFlight, State::Completed);
    });

    assert!(logs.contains("task.execute"), "{logs}");
    assert!(logs.contains("heavy_compute"), "{logs}");
    assert!(logs.contains("t-42"), "{logs}");
    assert!(logs.contains("from=queued to=in_flight"), "{logs}");
    assert!(logs.contains("from=in_flight to=completed"), "{logs}");
    assert!(logs.contains("task.state=completed"), "{logs}");
    assert!(!logs.contains("WARN"), "{logs}");
}

#[test]
fn unexpected_transition_is_recorded_not_rejected() {
    let logs = capture(|| {
        let span = task::start_task_span("heavy_compute", &TaskId::from("t-1"), 2);
        task::record_state_transition(&span, State::Dead, State::Queued);
    });

    assert!(logs.contains("WARN"), "{logs}");
    assert!(logs.contains("unexpected state_transition"), "{logs}");
    assert!(logs.contains("from=dead to=queued"), "{logs}");
    assert!(logs.contains("task.state=queued"), "{logs}");
}
