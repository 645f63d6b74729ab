use beseri_rs::model::*;
use serde_json::json;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[test]
fn task_serializes_with_wire_field_names() {
    let task = NewTask::new("heavy_compute")
        .payload(json!({"n": 200}))
        .build();
    let value: serde_json::Value = serde_json::from_str(&task.to_json().unwrap()).unwrap();

    assert_eq!(value["id"], json!(task.id.as_str()));
    assert_eq!(value["type"], "heavy_compute");
    assert_eq!(value["payload"], json!({"n": 200}));
    assert_eq!(value["retries"], 0);
    assert_eq!(value["max_retries"], DEFAULT_MAX_RETRIES);
    assert!(value["ts"].is_f64());
    assert!(value.get("task_type").is_none());
}

#[test]
fn task_from_foreign_producer_parses() {
    let raw = r#"{"id":"abc-123","type":"heavy_compute","payload":{"n":5},"retries":1,"max_retries":4,"ts":1700000000.25}"#;
    let task = Task::from_json(raw).unwrap();

    assert_eq!(task.id, TaskId::from("abc-123"));
    assert_eq!(task.task_type, "heavy_compute");
    assert_eq!(task.payload, json!({"n": 5}));
    assert_eq!(task.retries, 1);
    assert_eq!(task.max_retries, 4);
    assert_eq!(task.created_at.timestamp(), 1_700_000_000);
    assert_eq!(task.created_at.timestamp_subsec_millis(), 250);
}

#[test]
fn missing_counters_take_defaults() {
    let task = Task::from_json(r#"{"id":"t1","type":"echo"}"#).unwrap();
    assert_eq!(task.retries, 0);
    assert_eq!(task.max_retries, DEFAULT_MAX_RETRIES);
    assert!(task.payload.is_null());
}

#[test]
fn created_at_alias_accepted() {
    let task = Task::from_json(r#"{"id":"t1","type":"echo","created_at":1700000000.0}"#).unwrap();
    assert_eq!(task.created_at.timestamp(), 1_700_000_000);
}

#[test]
fn ts_wins_when_both_timestamps_present() {
    let task = Task::from_json(
        r#"{"id":"t1","type":"echo","ts":1700000000.0,"created_at":1600000000.0}"#,
    )
    .unwrap();
    assert_eq!(task.created_at.timestamp(), 1_700_000_000);
}

#[test]
fn retry_budget_capped_below_counter_limit() {
    let task = NewTask::new("echo").max_retries(u32::MAX).build();
    assert_eq!(task.max_retries, MAX_RETRY_BUDGET);

    let task = Task::from_json(r#"{"id":"t1","type":"echo","max_retries":4294967295}"#).unwrap();
    assert_eq!(task.max_retries, MAX_RETRY_BUDGET);

    // Built by hand, bypassing both caps.
    let mut task = task;
    task.max_retries = u32::MAX;
    task.retries = u32::MAX;
    assert!(task.is_exhausted());
}

#[test]
fn malformed_blob_rejected() {
    assert!(Task::from_json("not json").is_err());
    assert!(Task::from_json(r#"{"type":"echo"}"#).is_err());
    assert!(Task::from_json(r#"{"id":"t1","type":"echo","retries":-1}"#).is_err());
}

#[test]
fn reserialized_task_keeps_identity_fields() {
    let task = NewTask::new("echo").payload(json!("hi")).max_retries(1).build();
    let back = Task::from_json(&task.to_json().unwrap()).unwrap();
    assert_eq!(back.id, task.id);
    assert_eq!(back.max_retries, 1);
    assert_eq!(
        back.created_at.timestamp_micros(),
        task.created_at.timestamp_micros()
    );
}

#[test]
fn retry_budget_exhausted_only_past_max() {
    let mut task = NewTask::new("echo").max_retries(2).build();
    task.retries = 2;
    assert!(!task.is_exhausted());
    task.retries = 3;
    assert!(task.is_exhausted());

    let mut once = NewTask::new("echo").max_retries(0).build();
    assert!(!once.is_exhausted());
    once.retries = 1;
    assert!(once.is_exhausted());
}

#[test]
fn task_ids_are_unique() {
    let a = NewTask::new("echo").build();
    let b = NewTask::new("echo").build();
    assert_ne!(a.id, b.id);
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[test]
fn lifecycle_transitions() {
    assert!(State::Created.can_transition_to(State::Queued));
    assert!(State::Queued.can_transition_to(State::InFlight));
    assert!(State::InFlight.can_transition_to(State::Completed));
    assert!(State::InFlight.can_transition_to(State::Requeued));
    assert!(State::InFlight.can_transition_to(State::Dead));
    assert!(State::InFlight.can_transition_to(State::Queued));
    assert!(State::Requeued.can_transition_to(State::Queued));

    assert!(!State::Queued.can_transition_to(State::Completed));
    assert!(!State::Completed.can_transition_to(State::Queued));
    assert!(!State::Dead.can_transition_to(State::Queued));
}

#[test]
fn terminal_states() {
    assert!(State::Completed.is_terminal());
    assert!(State::Dead.is_terminal());
    assert!(!State::InFlight.is_terminal());
    assert!(!State::Requeued.is_terminal());
}

#[test]
fn state_display_is_snake_case() {
    assert_eq!(State::InFlight.to_string(), "in_flight");
    assert_eq!(
        serde_json::to_value(State::InFlight).unwrap(),
        json!("in_flight")
    );
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[test]
fn outcome_success_requires_zero_code_and_no_failure() {
    assert!(Outcome::noop().is_success());
    let nonzero = Outcome {
        code: 1,
        output: String::new(),
        duration_ms: 3,
        failure: None,
    };
    assert!(!nonzero.is_success());
    assert!(!Outcome::failed(FailureKind::BackendMissing, "gone", 0).is_success());
}

#[test]
fn result_record_wire_format() {
    let record = TaskResult {
        task_id: TaskId::from("t1"),
        result: Outcome::failed(FailureKind::SpawnFailed, "denied", 12),
        ts: chrono::Utc::now(),
    };
    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value["task_id"], "t1");
    assert_eq!(value["result"]["retcode"], -1);
    assert_eq!(value["result"]["output"], "denied");
    assert_eq!(value["result"]["failure"], "spawn_failed");
    assert!(value["ts"].is_f64());

    let success = serde_json::to_value(Outcome::noop()).unwrap();
    assert!(success.get("failure").is_none());
}

#[test]
fn epoch_seconds_round_trip_and_reject_nan() {
    let now = chrono::Utc::now();
    let back = from_epoch_seconds(to_epoch_seconds(&now)).unwrap();
    assert_eq!(back.timestamp_micros(), now.timestamp_micros());
    assert!(from_epoch_seconds(f64::NAN).is_none());
}
