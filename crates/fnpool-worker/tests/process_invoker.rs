//! Integration tests for the process-backed invoker.
//!
//! Each test drives the real `fnpool-worker` binary with a different behavior.

use std::time::{Duration, Instant};

use fnpool_core::{
    Error, ExecutionContext, Input, InvokerState, Invoker, InvokerFactory, ProcessInvoker,
    ProcessInvokerFactory, ProcessTemplate,
};

fn worker(behavior: &str) -> ProcessTemplate {
    ProcessTemplate::new(env!("CARGO_BIN_EXE_fnpool-worker")).args(["--behavior", behavior])
}

fn invoker(template: ProcessTemplate) -> ProcessInvoker {
    ProcessInvoker::from_template(&template).expect("worker binary should resolve")
}

/// Whether a process with this pid still exists.
fn process_exists(pid: u32) -> bool {
    // SAFETY: signal 0 only checks for existence and permission.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[test]
fn test_greeting_roundtrip() {
    let mut invoker = invoker(worker("greet"));
    let ctx = ExecutionContext::with_timeout(Duration::from_secs(30))
        .with_env([("Content-Type", "text/plain")]);

    let result = invoker.invoke(&Input::new("world"), &ctx).unwrap();

    assert_eq!(String::from_utf8(result.data).unwrap(), "Hello, world!");
    assert_eq!(result.status, 200);
    assert_eq!(result.env["Content-Type"], "text/plain");
    assert_eq!(invoker.state(), InvokerState::Idle);
}

#[test]
fn test_process_is_reused_across_calls() {
    let mut invoker = invoker(worker("echo"));
    let ctx = ExecutionContext::with_timeout(Duration::from_secs(30));

    let first = invoker.invoke(&Input::new("one"), &ctx).unwrap();
    let pid = invoker.pid().unwrap();
    let second = invoker.invoke(&Input::new("two"), &ctx).unwrap();

    assert_eq!(first.data, b"one");
    assert_eq!(second.data, b"two");
    assert_eq!(invoker.pid(), Some(pid));
    assert!(process_exists(pid));
}

#[test]
fn test_large_payload() {
    // Larger than a pipe buffer in both directions.
    let payload = vec![b'x'; 1024 * 1024];
    let mut invoker = invoker(worker("echo"));
    let ctx = ExecutionContext::with_timeout(Duration::from_secs(30));

    let result = invoker.invoke(&Input::new(payload.clone()), &ctx).unwrap();

    assert_eq!(result.data, payload);
}

#[test]
fn test_hung_backend_is_killed_at_deadline() {
    let mut invoker = invoker(worker("sleep"));
    let timeout = Duration::from_millis(200);
    let ctx = ExecutionContext::with_timeout(timeout);

    let start = Instant::now();
    let err = invoker.invoke(&Input::new("some data"), &ctx).unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, Error::ExecutionTimeout), "got {err:?}");
    assert!(
        elapsed < timeout + Duration::from_secs(2),
        "timeout took too long: {elapsed:?}"
    );

    let pid = invoker.pid().unwrap();
    assert!(!process_exists(pid), "backend {pid} is still running");
    assert_eq!(invoker.state(), InvokerState::Dead);
}

#[test]
fn test_silent_backend_is_decode_failure() {
    let mut invoker = invoker(worker("silent"));
    let ctx = ExecutionContext::with_timeout(Duration::from_secs(30));

    let start = Instant::now();
    let err = invoker.invoke(&Input::new("some data"), &ctx).unwrap_err();

    assert!(matches!(err, Error::Decode(_)), "got {err:?}");
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(invoker.state(), InvokerState::Dead);
}

#[test]
fn test_garbage_reply_is_decode_failure() {
    let mut invoker = invoker(worker("garbage"));
    let ctx = ExecutionContext::with_timeout(Duration::from_secs(30));

    let err = invoker.invoke(&Input::new("some data"), &ctx).unwrap_err();

    assert!(matches!(err, Error::Decode(_)), "got {err:?}");
    let pid = invoker.pid().unwrap();
    assert!(!process_exists(pid));
}

#[test]
fn test_failed_invoker_is_not_reused() {
    let mut invoker = invoker(worker("crash-after"));
    let ctx = ExecutionContext::with_timeout(Duration::from_secs(30));

    assert!(invoker.invoke(&Input::new("first"), &ctx).is_ok());
    assert!(invoker.invoke(&Input::new("second"), &ctx).is_err());

    let err = invoker.invoke(&Input::new("third"), &ctx).unwrap_err();
    assert!(matches!(err, Error::Terminated), "got {err:?}");
}

#[test]
fn test_missing_deadline_leaves_invoker_usable() {
    let mut invoker = invoker(worker("greet"));

    let err = invoker
        .invoke(&Input::new("world"), &ExecutionContext::new())
        .unwrap_err();
    assert!(matches!(err, Error::MissingDeadline));

    let ctx = ExecutionContext::with_timeout(Duration::from_secs(30));
    let result = invoker.invoke(&Input::new("world"), &ctx).unwrap();
    assert_eq!(result.data, b"Hello, world!");
}

#[test]
fn test_missing_executable_fails_construction() {
    let factory = ProcessInvokerFactory::new(ProcessTemplate::new("does_not_exist"));
    assert!(matches!(factory.new_invoker(), Err(Error::Factory(_))));
}

#[test]
fn test_dropping_invoker_kills_backend() {
    let mut invoker = invoker(worker("echo"));
    let ctx = ExecutionContext::with_timeout(Duration::from_secs(30));
    invoker.invoke(&Input::new("ping"), &ctx).unwrap();
    let pid = invoker.pid().unwrap();

    drop(invoker);

    assert!(!process_exists(pid));
}
