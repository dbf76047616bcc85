//! fnpool worker - reference backend process.
//!
//! Speaks the fnpool protocol on stdin/stdout. The `--behavior` flag selects
//! how it answers, which makes it useful both as a template for real backends
//! and as a misbehaving backend in tests. Logs go to stderr; stdout belongs to
//! the protocol.

use std::io::{BufReader, BufWriter, Write};
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use fnpool_core::{ExecutionContext, InvocationResult, Input};
use fnpool_worker::{read_invocation, serve, write_result};

#[derive(Parser)]
#[command(name = "fnpool-worker")]
#[command(about = "Reference backend process for fnpool")]
#[command(version)]
struct Cli {
    /// How to answer invocations
    #[arg(short, long, value_enum, default_value_t = Behavior::Greet)]
    behavior: Behavior,

    /// Delay before answering, for `sleep`
    #[arg(long, default_value = "60000")]
    sleep_ms: u64,

    /// Number of invocations answered before `crash-after` exits
    #[arg(long, default_value = "1")]
    crash_after: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Behavior {
    /// Reply "Hello, <input>!" with status 200, echoing the context env
    Greet,
    /// Reply with the input unchanged
    Echo,
    /// Sleep for --sleep-ms, then greet
    Sleep,
    /// Read the invocation, then exit without replying
    Silent,
    /// Reply with a frame that is not a valid result
    Garbage,
    /// Greet --crash-after times, then exit with status 1 mid-invocation
    CrashAfter,
}

fn greet(input: Input, ctx: ExecutionContext) -> InvocationResult {
    let name = String::from_utf8_lossy(input.data()).into_owned();
    InvocationResult::new(format!("Hello, {}!", name))
        .with_status(200)
        .with_env(ctx.env().clone())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(behavior = ?cli.behavior, pid = std::process::id(), "Worker started");

    let mut stdin = BufReader::new(std::io::stdin().lock());
    let mut stdout = BufWriter::new(std::io::stdout().lock());

    let served = match cli.behavior {
        Behavior::Greet => serve(&mut stdin, &mut stdout, greet)?,
        Behavior::Echo => serve(
            &mut stdin,
            &mut stdout,
            |input: Input, _: ExecutionContext| InvocationResult::new(input.into_data()),
        )?,
        Behavior::Sleep => {
            let delay = Duration::from_millis(cli.sleep_ms);
            serve(&mut stdin, &mut stdout, |input: Input, ctx: ExecutionContext| {
                thread::sleep(delay);
                greet(input, ctx)
            })?
        }
        Behavior::Silent => {
            let invocation = read_invocation(&mut stdin)?;
            tracing::debug!(received = invocation.is_some(), "Exiting without a reply");
            0
        }
        Behavior::Garbage => {
            let mut served = 0;
            while read_invocation(&mut stdin)?.is_some() {
                stdout.write_all(&3u32.to_le_bytes())?;
                stdout.write_all(&[0xde, 0xad, 0xbf])?;
                stdout.flush()?;
                served += 1;
            }
            served
        }
        Behavior::CrashAfter => {
            let mut served = 0;
            while let Some((input, ctx)) = read_invocation(&mut stdin)? {
                if served >= cli.crash_after {
                    tracing::debug!(served, "Crashing on purpose");
                    std::process::exit(1);
                }
                write_result(&mut stdout, &greet(input, ctx))?;
                served += 1;
            }
            served
        }
    };

    tracing::debug!(served, "Host closed the stream, exiting");
    Ok(())
}
