//! Run command implementation.
//!
//! The pool is blocking, so every invocation runs on tokio's blocking thread
//! pool; a semaphore keeps at most one in-flight call per worker.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use fnpool_core::{
    ExecutionContext, Input, InvocationResult, InvokerPool, PoolConfig, PoolSettings,
    ProcessInvokerFactory, ProcessTemplate,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Semaphore;

use crate::PoolArgs;

/// Deadline used when neither `--timeout-ms` nor the config sets one.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Build a pool from the config file (if any) with command-line overrides.
pub fn build_pool(args: &PoolArgs) -> anyhow::Result<InvokerPool> {
    let config = match &args.config {
        Some(path) => Some(PoolConfig::from_file(path)?),
        None => None,
    };

    let backend = match (args.command.split_first(), &config) {
        (Some((program, rest)), _) => ProcessTemplate::new(program).args(rest.iter().cloned()),
        (None, Some(config)) => config.backend.clone(),
        (None, None) => {
            bail!("no backend program: pass one after `--` or set `backend` in --config")
        }
    };

    let mut settings = config.map(|c| c.pool).unwrap_or_else(PoolSettings::default);
    if let Some(workers) = args.workers {
        settings.max_invoker_count = workers;
    }
    if let Some(max_wait_ms) = args.max_wait_ms {
        settings.max_wait = Duration::from_millis(max_wait_ms);
    }
    // An explicit timeout goes on every context; otherwise the pool derives
    // deadlines from max_runnable_time.
    if args.timeout_ms.is_none() && settings.max_runnable_time.is_none() {
        settings.max_runnable_time = Some(DEFAULT_TIMEOUT);
    }
    if settings.max_invoker_count == 0 {
        bail!("the pool needs at least one worker");
    }

    tracing::debug!(
        program = %backend.program.display(),
        workers = settings.max_invoker_count,
        max_runnable_time = ?settings.max_runnable_time,
        "Building invoker pool"
    );

    let pool = InvokerPool::new(settings, ProcessInvokerFactory::new(backend))?;
    Ok(pool)
}

fn context(args: &PoolArgs) -> ExecutionContext {
    let ctx = match args.timeout_ms {
        Some(timeout_ms) => ExecutionContext::with_timeout(Duration::from_millis(timeout_ms)),
        None => ExecutionContext::new(),
    };
    ctx.with_env(args.env.iter().cloned())
}

/// Invoke the backend once and write the reply data to stdout.
pub async fn invoke_once(args: &PoolArgs, data: String) -> anyhow::Result<()> {
    let pool = build_pool(args)?;
    let ctx = context(args);

    let result = tokio::task::spawn_blocking(move || pool.invoke(&Input::new(data), &ctx))
        .await
        .context("invocation task panicked")??;

    if result.status != 0 {
        tracing::info!(status = result.status, "Backend returned non-zero status");
    }
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&result.data)?;
    stdout.flush()?;
    Ok(())
}

/// Invoke the backend once per stdin line, printing `status<TAB>data` lines in
/// input order.
pub async fn run_lines(args: &PoolArgs) -> anyhow::Result<()> {
    let pool = Arc::new(build_pool(args)?);
    let permits = Arc::new(Semaphore::new(pool.capacity()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = Vec::new();

    while let Some(line) = lines.next_line().await? {
        let permit = Arc::clone(&permits).acquire_owned().await?;
        let pool = Arc::clone(&pool);
        let ctx = context(args);

        tasks.push(tokio::task::spawn_blocking(move || {
            let result = pool.invoke(&Input::new(line), &ctx);
            drop(permit);
            result
        }));
    }

    let total = tasks.len();
    let mut failed = 0;

    for (index, task) in tasks.into_iter().enumerate() {
        match task.await.context("invocation task panicked")? {
            Ok(result) => println!("{}", format_result(&result)),
            Err(e) => {
                failed += 1;
                eprintln!("line {}: {}", index + 1, e.with_hint());
            }
        }
    }

    tracing::debug!(
        total,
        failed,
        live = pool.live_count(),
        "Finished running invocations"
    );

    if failed > 0 {
        let lost = pool.capacity() - pool.live_count();
        bail!(
            "{} of {} invocations failed ({} of {} workers lost)",
            failed,
            total,
            lost,
            pool.capacity()
        );
    }
    Ok(())
}

fn format_result(result: &InvocationResult) -> String {
    format!(
        "{}\t{}",
        result.status,
        String::from_utf8_lossy(&result.data).trim_end_matches('\n')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &[&str]) -> PoolArgs {
        PoolArgs {
            config: None,
            workers: None,
            max_wait_ms: None,
            timeout_ms: Some(1000),
            env: vec![("A".to_string(), "1".to_string())],
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_build_pool_requires_backend() {
        let err = build_pool(&args(&[])).err().unwrap();
        assert!(err.to_string().contains("no backend program"));
    }

    #[test]
    fn test_build_pool_rejects_zero_workers() {
        let mut args = args(&["sh"]);
        args.workers = Some(0);
        assert!(build_pool(&args).is_err());
    }

    #[test]
    fn test_build_pool_overrides() {
        let mut args = args(&["sh", "-c", "cat"]);
        args.workers = Some(3);
        args.max_wait_ms = Some(750);

        let pool = build_pool(&args).unwrap();

        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.ready_count(), 3);
        assert_eq!(pool.settings().max_wait, Duration::from_millis(750));
    }

    #[test]
    fn test_timeout_flag_leaves_runnable_time_unset() {
        let pool = build_pool(&args(&["sh", "-c", "cat"])).unwrap();
        assert_eq!(pool.settings().max_runnable_time, None);
    }

    #[test]
    fn test_default_timeout_without_flag_or_config() {
        let mut args = args(&["sh", "-c", "cat"]);
        args.timeout_ms = None;

        let pool = build_pool(&args).unwrap();

        assert_eq!(pool.settings().max_runnable_time, Some(DEFAULT_TIMEOUT));
        assert_eq!(context(&args).deadline(), None);
    }

    #[test]
    fn test_config_runnable_time_is_kept_without_flag() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pool.json");
        std::fs::write(
            &path,
            r#"{ "pool": { "max_invoker_count": 1, "max_runnable_time_ms": 200 },
                 "backend": { "program": "sh", "args": ["-c", "cat"] } }"#,
        )
        .unwrap();

        let mut args = args(&[]);
        args.config = Some(path);
        args.timeout_ms = None;
        let pool = build_pool(&args).unwrap();

        assert_eq!(
            pool.settings().max_runnable_time,
            Some(Duration::from_millis(200))
        );
        let ctx = context(&args);
        assert_eq!(ctx.deadline(), None);
        assert_eq!(ctx.env()["A"], "1");
    }

    #[test]
    fn test_context_carries_env_and_deadline() {
        let ctx = context(&args(&["sh"]));
        assert!(ctx.deadline().is_some());
        assert_eq!(ctx.env()["A"], "1");
    }

    #[test]
    fn test_format_result() {
        let result = InvocationResult::new("Hello, world!\n").with_status(200);
        assert_eq!(format_result(&result), "200\tHello, world!");
    }
}
