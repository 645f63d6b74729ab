//! Integration tests for the executor bridge and registry.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use beseri_rs::error::Error;
use beseri_rs::executor::{ArgSource, Executor, ExecutorRegistry, ProcessExecutor};
use beseri_rs::model::*;
use serde_json::json;

fn task(task_type: &str, payload: serde_json::Value) -> Task {
    NewTask::new(task_type).payload(payload).build()
}

/// Fresh scratch directory under the system temp dir.
fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("beseri-exec-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Executor that runs a shell script file given in the payload. The script is
/// read by `/bin/sh` rather than executed directly.
fn shell_executor() -> ProcessExecutor {
    ProcessExecutor::new(
        "/bin/sh",
        ArgSource::Field {
            name: "script".to_string(),
            default: None,
        },
    )
}

fn write_script(body: &str) -> String {
    let path = scratch_dir().join("task.sh");
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// Argument rendering
// ---------------------------------------------------------------------------

#[test]
fn field_renders_numbers_and_strings() {
    let arg = ArgSource::Field {
        name: "n".to_string(),
        default: None,
    };
    assert_eq!(arg.render(&json!({"n": 200})).unwrap(), "200");
    assert_eq!(arg.render(&json!({"n": "abc"})).unwrap(), "abc");
    assert_eq!(arg.render(&json!({"n": true})).unwrap(), "true");
    assert_eq!(arg.render(&json!({"n": [1, 2]})).unwrap(), "[1,2]");
}

#[test]
fn field_falls_back_to_default() {
    let arg = ArgSource::Field {
        name: "n".to_string(),
        default: Some(json!(200)),
    };
    assert_eq!(arg.render(&json!({})).unwrap(), "200");
    assert_eq!(arg.render(&json!({"n": null})).unwrap(), "200");
    assert_eq!(arg.render(&json!(null)).unwrap(), "200");
    assert_eq!(arg.render(&json!({"n": 5})).unwrap(), "5");
}

#[test]
fn missing_field_without_default_is_an_error() {
    let arg = ArgSource::Field {
        name: "n".to_string(),
        default: None,
    };
    assert!(arg.render(&json!({"m": 1})).is_err());
}

#[test]
fn whole_payload_renders_as_json() {
    let payload = json!({"n": 1, "s": "x"});
    let rendered = ArgSource::Payload.render(&payload).unwrap();
    let back: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    assert_eq!(back, payload);
}

// ---------------------------------------------------------------------------
// ProcessExecutor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stdout_becomes_trimmed_output() {
    let executor = ProcessExecutor::new(
        "/bin/echo",
        ArgSource::Field {
            name: "msg".to_string(),
            default: None,
        },
    );
    let outcome = executor
        .execute(&task("echo", json!({"msg": "hello world"})))
        .await;

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(outcome.code, 0);
    assert_eq!(outcome.output, "hello world");
    assert!(outcome.failure.is_none());
}

#[tokio::test]
async fn nonzero_exit_is_a_failure_with_its_code() {
    let script = write_script("echo partial\nexit 3\n");
    let outcome = shell_executor()
        .execute(&task("sh", json!({"script": script})))
        .await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.code, 3);
    assert_eq!(outcome.output, "partial");
    assert!(outcome.failure.is_none());
}

#[tokio::test]
async fn killed_process_reports_terminated() {
    let script = write_script("kill -9 $$\n");
    let outcome = shell_executor()
        .execute(&task("sh", json!({"script": script})))
        .await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.failure, Some(FailureKind::Terminated));
}

#[tokio::test]
async fn missing_binary_reports_backend_missing() {
    let executor = ProcessExecutor::new("definitely/not/a/binary", ArgSource::Payload);
    let outcome = executor.execute(&task("ghost", json!({}))).await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.code, -1);
    assert_eq!(outcome.failure, Some(FailureKind::BackendMissing));
}

#[tokio::test]
async fn unrenderable_payload_reports_invalid_payload() {
    let outcome = shell_executor()
        .execute(&task("sh", json!({"other": 1})))
        .await;
    assert_eq!(outcome.failure, Some(FailureKind::InvalidPayload));
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct Fixed(i32);

#[async_trait]
impl Executor for Fixed {
    async fn execute(&self, _task: &Task) -> Outcome {
        Outcome {
            code: self.0,
            output: format!("fixed {}", self.0),
            duration_ms: 0,
            failure: None,
        }
    }
}

#[tokio::test]
async fn unregistered_type_runs_as_noop() {
    let registry = ExecutorRegistry::empty();
    let outcome = registry.execute(&task("unknown", json!({}))).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.output, "noop");
}

#[tokio::test]
async fn registry_dispatches_by_type() {
    let registry = ExecutorRegistry::empty()
        .with("ok", Arc::new(Fixed(0)))
        .with("bad", Arc::new(Fixed(2)));

    assert_eq!(registry.task_types(), vec!["bad", "ok"]);
    assert!(registry.execute(&task("ok", json!({}))).await.is_success());
    assert_eq!(registry.execute(&task("bad", json!({}))).await.code, 2);
}

#[tokio::test]
async fn load_from_dir_reads_toml_files() {
    let dir = scratch_dir();
    std::fs::write(
        dir.join("echo.toml"),
        r#"
[executor]
name = "echo"
command = "/bin/echo"
arg = "msg"
default = "fallback"
"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("dump.toml"),
        r#"
[executor]
name = "dump"
command = "/bin/echo"
"#,
    )
    .unwrap();
    std::fs::write(dir.join("README.md"), "not a config").unwrap();

    let registry = ExecutorRegistry::load_from_dir(&dir).unwrap();
    assert_eq!(registry.task_types(), vec!["dump", "echo"]);

    let outcome = registry.execute(&task("echo", json!({}))).await;
    assert_eq!(outcome.output, "fallback");

    let outcome = registry.execute(&task("dump", json!({"n": 1}))).await;
    assert_eq!(outcome.output, r#"{"n":1}"#);
}

#[test]
fn load_from_dir_rejects_bad_toml() {
    let dir = scratch_dir();
    std::fs::write(dir.join("broken.toml"), "[executor]\nname = 1\n").unwrap();
    assert!(matches!(
        ExecutorRegistry::load_from_dir(&dir),
        Err(Error::Config(_))
    ));
}

#[test]
fn load_from_missing_dir_fails() {
    let dir = std::env::temp_dir().join(format!("beseri-missing-{}", uuid::Uuid::new_v4()));
    assert!(matches!(
        ExecutorRegistry::load_from_dir(&dir),
        Err(Error::Config(_))
    ));
}

#[test]
fn bundled_executor_config_parses() {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("executors");
    let registry = ExecutorRegistry::load_from_dir(&dir).unwrap();
    assert!(registry.get("heavy_compute").is_some());
}
