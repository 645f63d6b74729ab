use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use beseri_rs::config::Config;
use beseri_rs::error::Error;
use secrecy::ExposeSecret;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn defaults_when_nothing_is_set() {
    let config = Config::from_lookup(lookup(&[])).unwrap();

    assert_eq!(config.redis_url.expose_secret(), "redis://localhost:6379");
    assert_eq!(config.queue_prefix, "beseri");
    assert_eq!(config.max_workers, 4);
    assert_eq!(config.visibility_timeout, Duration::from_secs(30));
    assert_eq!(config.reaper_interval, Duration::from_secs(5));
    assert_eq!(config.claim_timeout, Duration::from_secs(5));
    assert_eq!(config.backoff_base, 1.5);
    assert_eq!(config.backoff_cap, Duration::from_secs(10));
    assert_eq!(config.executors_dir, PathBuf::from("executors"));
    assert!(config.otel_endpoint.is_none());
    assert_eq!(config.log_level, "info");
}

#[test]
fn redis_url_built_from_host_port_password() {
    let config = Config::from_lookup(lookup(&[
        ("REDIS_HOST", "cache.internal"),
        ("REDIS_PORT", "6380"),
        ("REDIS_PASSWORD", "hunter2"),
    ]))
    .unwrap();
    assert_eq!(
        config.redis_url.expose_secret(),
        "redis://:hunter2@cache.internal:6380"
    );
}

#[test]
fn redis_url_takes_precedence_over_host() {
    let config = Config::from_lookup(lookup(&[
        ("REDIS_URL", "redis://primary:6379/2"),
        ("REDIS_HOST", "ignored"),
    ]))
    .unwrap();
    assert_eq!(config.redis_url.expose_secret(), "redis://primary:6379/2");
}

#[test]
fn secret_not_shown_in_debug() {
    let config =
        Config::from_lookup(lookup(&[("REDIS_URL", "redis://:hunter2@localhost:6379")])).unwrap();
    assert!(!format!("{config:?}").contains("hunter2"));
}

#[test]
fn fractional_seconds_accepted() {
    let config = Config::from_lookup(lookup(&[
        ("VISIBILITY_TIMEOUT", "2.5"),
        ("CLAIM_TIMEOUT", "0.25"),
    ]))
    .unwrap();
    assert_eq!(config.visibility_timeout, Duration::from_millis(2500));
    assert_eq!(config.claim_timeout, Duration::from_millis(250));
}

#[test]
fn zero_workers_rejected() {
    let result = Config::from_lookup(lookup(&[("MAX_WORKERS", "0")]));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn unparseable_number_rejected() {
    let result = Config::from_lookup(lookup(&[("MAX_WORKERS", "lots")]));
    assert!(matches!(result, Err(Error::Config(_))));

    let result = Config::from_lookup(lookup(&[("REDIS_PORT", "99999")]));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn backoff_base_below_one_rejected() {
    let result = Config::from_lookup(lookup(&[("BACKOFF_BASE", "0.5")]));
    assert!(matches!(result, Err(Error::Config(_))));

    let result = Config::from_lookup(lookup(&[("BACKOFF_BASE", "NaN")]));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn negative_duration_rejected() {
    let result = Config::from_lookup(lookup(&[("BACKOFF_CAP", "-1")]));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn config_from_env_reads_process_environment() {
    unsafe {
        std::env::set_var("QUEUE_PREFIX", "env-test");
        std::env::set_var("MAX_WORKERS", "7");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.queue_prefix, "env-test");
    assert_eq!(config.max_workers, 7);

    unsafe {
        std::env::remove_var("QUEUE_PREFIX");
        std::env::remove_var("MAX_WORKERS");
    }
}
