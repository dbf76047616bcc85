//! Process-backed invokers.
//!
//! A [`ProcessInvoker`] owns one backend process and talks to it over its
//! stdin/stdout pipes. The process is started lazily on the first invoke and
//! killed the moment any invocation fails; a killed invoker is never reused.

use std::io::{BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;
use std::time::Instant;

use crossbeam_channel::select;

use crate::config::ProcessTemplate;
use crate::error::{Error, Result};
use crate::execute::{ExecutionContext, InvocationResult, Input, Invoker, InvokerFactory};

use super::protocol::{encode_invocation, read_result};

/// Lifecycle of a [`ProcessInvoker`].
///
/// `Created` has a configured command but no process yet. `Idle` has a
/// running process that completed its last call. `Dead` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokerState {
    Created,
    Idle,
    Dead,
}

/// Both ends of the pipe pair. Moved into the exchange thread for the length
/// of one call and handed back on success.
struct Pipes {
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

type Exchange = (Pipes, Result<InvocationResult>);

/// Invoker that runs each call in a dedicated backend process.
///
/// The process is reused across calls as long as every call succeeds. Any
/// failure (write error, malformed or missing reply, deadline) kills it.
pub struct ProcessInvoker {
    command: Command,
    child: Option<Child>,
    pipes: Option<Pipes>,
    pid: Option<u32>,
    state: InvokerState,
}

impl ProcessInvoker {
    /// Wrap an unstarted command. Its stdin and stdout are replaced with
    /// pipes; the process itself starts on the first invoke.
    pub fn new(mut command: Command) -> Self {
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        Self {
            command,
            child: None,
            pipes: None,
            pid: None,
            state: InvokerState::Created,
        }
    }

    /// Build an invoker from a template, failing if the program cannot be
    /// resolved.
    pub fn from_template(template: &ProcessTemplate) -> Result<Self> {
        let program = template.resolve_program()?;
        Ok(Self::new(template.command(&program)))
    }

    pub fn state(&self) -> InvokerState {
        self.state
    }

    /// Process ID of the backend, once started.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Spawn the backend process.
    fn start(&mut self) -> Result<()> {
        let mut child = self.command.spawn().map_err(|e| {
            Error::Factory(format!(
                "failed to spawn backend '{}': {}",
                self.command.get_program().to_string_lossy(),
                e
            ))
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Factory(
                "backend process was spawned without stdin/stdout pipes".to_string(),
            ));
        };

        let pid = child.id();
        tracing::debug!(pid, "Spawned backend process");

        self.pid = Some(pid);
        self.child = Some(child);
        self.pipes = Some(Pipes {
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
        });
        self.state = InvokerState::Idle;
        Ok(())
    }

    /// Kill the backend process and mark the invoker dead.
    fn kill(&mut self) {
        self.state = InvokerState::Dead;
        self.pipes = None;

        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();

        if let Err(e) = child.kill() {
            // Already exited on its own; reaping below is all that's left.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!(pid, "Failed to kill backend process: {}", e);
            }
        }

        // Wait to reap zombie
        let _ = child.wait();
        tracing::debug!(pid, "Killed backend process");
    }

    /// Mark the invoker dead and pass the error through.
    fn fail(&mut self, err: Error) -> Error {
        self.kill();
        err
    }
}

impl Invoker for ProcessInvoker {
    fn invoke(&mut self, input: &Input, ctx: &ExecutionContext) -> Result<InvocationResult> {
        let Some(remaining) = ctx.remaining() else {
            return Err(Error::MissingDeadline);
        };

        if self.state == InvokerState::Dead {
            return Err(Error::Terminated);
        }
        if remaining.is_zero() {
            return Err(self.fail(Error::ExecutionTimeout));
        }
        if self.state == InvokerState::Created
            && let Err(e) = self.start()
        {
            self.state = InvokerState::Dead;
            return Err(e);
        }

        let frame = encode_invocation(input, ctx).map_err(|e| self.fail(e))?;
        let Some(mut pipes) = self.pipes.take() else {
            return Err(self.fail(Error::Terminated));
        };

        // One thread per call writes the invocation and reads the reply, so
        // the deadline also bounds a backend that stops draining its stdin.
        let (reply_tx, reply_rx) = crossbeam_channel::bounded::<Exchange>(1);
        let spawned = thread::Builder::new()
            .name("fnpool-exchange".to_string())
            .spawn(move || {
                let result = exchange(&mut pipes, &frame);
                let _ = reply_tx.send((pipes, result));
            });
        if let Err(e) = spawned {
            return Err(self.fail(Error::Io(e)));
        }

        let timeout = crossbeam_channel::at(Instant::now() + remaining);

        // Whichever fires first wins; the loser is abandoned. A timed-out
        // exchange thread ends once the killed process's pipes close.
        select! {
            recv(reply_rx) -> reply => match reply {
                Ok((pipes, Ok(result))) => {
                    self.pipes = Some(pipes);
                    Ok(result)
                }
                Ok((_, Err(e))) => {
                    tracing::debug!(pid = ?self.pid, error = %e, "Backend exchange failed");
                    Err(self.fail(e))
                }
                Err(_) => Err(self.fail(Error::Decode(
                    "exchange thread exited without a reply".to_string(),
                ))),
            },
            recv(timeout) -> _ => {
                tracing::debug!(pid = ?self.pid, "Backend missed its deadline");
                Err(self.fail(Error::ExecutionTimeout))
            },
        }
    }
}

impl Drop for ProcessInvoker {
    fn drop(&mut self) {
        // Ensure the backend is killed when the invoker is dropped
        if self.child.is_some() {
            self.kill();
        }
    }
}

/// Deliver one encoded invocation and read the reply.
fn exchange(pipes: &mut Pipes, frame: &[u8]) -> Result<InvocationResult> {
    pipes
        .stdin
        .write_all(frame)
        .and_then(|()| pipes.stdin.flush())
        .map_err(|e| Error::Write(format!("failed to write invocation: {}", e)))?;
    read_result(&mut pipes.stdout)
}

/// Factory producing a fresh [`ProcessInvoker`] per call, each with its own
/// process cloned from the template.
#[derive(Debug, Clone)]
pub struct ProcessInvokerFactory {
    template: ProcessTemplate,
}

impl ProcessInvokerFactory {
    pub fn new(template: ProcessTemplate) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &ProcessTemplate {
        &self.template
    }
}

impl InvokerFactory for ProcessInvokerFactory {
    fn new_invoker(&self) -> Result<Box<dyn Invoker>> {
        Ok(Box::new(ProcessInvoker::from_template(&self.template)?))
    }
}
