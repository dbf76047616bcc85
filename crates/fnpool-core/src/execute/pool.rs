//! Bounded pool of leasable invokers.
//!
//! The ready queue is a fixed-capacity crossbeam channel: acquiring an invoker
//! is a `recv_timeout`, returning one is a non-blocking `try_send`. The channel
//! is the only synchronization the pool needs.

use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::config::PoolSettings;
use crate::error::{Error, Result};

use super::context::{ExecutionContext, InvocationResult, Input};
use super::invoker::{Invoker, InvokerFactory};

/// Pool of invoker workers that handles invocation requests.
///
/// The pool keeps `max_invoker_count` invokers in rotation. Each call leases
/// one exclusively; a failed invoker is discarded and replaced by a fresh one
/// from the factory. When a replacement cannot be built the pool runs with one
/// fewer worker from then on, which [`InvokerPool::live_count`] reports.
pub struct InvokerPool {
    settings: PoolSettings,
    factory: Box<dyn InvokerFactory>,
    ready_tx: Sender<Box<dyn Invoker>>,
    ready_rx: Receiver<Box<dyn Invoker>>,
    /// Workers in rotation or leased, i.e. not lost to failed replacements.
    live: AtomicUsize,
}

impl InvokerPool {
    /// Create a pool and fill it with `settings.max_invoker_count` invokers.
    ///
    /// Fails with the factory's error if any invoker cannot be created;
    /// invokers built before the failure are dropped.
    pub fn new(settings: PoolSettings, factory: impl InvokerFactory + 'static) -> Result<Self> {
        let capacity = settings.max_invoker_count;
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(capacity);

        for index in 0..capacity {
            let invoker = factory.new_invoker().inspect_err(|e| {
                tracing::debug!(index, error = %e, "Failed to create seed invoker");
            })?;
            if ready_tx.try_send(invoker).is_err() {
                return Err(Error::Factory(format!(
                    "ready queue rejected seed invoker {} of {}",
                    index + 1,
                    capacity
                )));
            }
        }

        tracing::debug!(capacity, "Invoker pool ready");

        Ok(Self {
            settings,
            factory: Box::new(factory),
            ready_tx,
            ready_rx,
            live: AtomicUsize::new(capacity),
        })
    }

    /// Run one invocation on a leased invoker.
    ///
    /// Waits up to `max_wait` for a free invoker and fails with
    /// `Error::AvailabilityTimeout` otherwise. If the context has no deadline
    /// and `max_runnable_time` is configured, the deadline becomes
    /// `now + max_runnable_time`.
    ///
    /// Errors from the invoker are returned unchanged after the pool has
    /// tried to replace it.
    pub fn invoke(&self, input: &Input, ctx: &ExecutionContext) -> Result<InvocationResult> {
        if self.settings.max_invoker_count > 0 && self.live_count() == 0 {
            return Err(Error::PoolExhausted(self.settings.max_invoker_count));
        }

        let ctx = self.effective_context(ctx);

        let mut invoker = match self.ready_rx.recv_timeout(self.settings.max_wait) {
            Ok(invoker) => invoker,
            Err(RecvTimeoutError::Timeout) => {
                tracing::debug!(wait = ?self.settings.max_wait, "No invoker became available");
                return Err(Error::AvailabilityTimeout(self.settings.max_wait));
            }
            // Unreachable while the pool holds its own sender.
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::PoolExhausted(self.settings.max_invoker_count));
            }
        };

        match invoker.invoke(input, &ctx) {
            Ok(result) => {
                self.give_back(invoker);
                Ok(result)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Invocation failed, discarding invoker");
                drop(invoker);
                self.replace();
                Err(e)
            }
        }
    }

    /// Number of invokers waiting in the ready queue.
    pub fn ready_count(&self) -> usize {
        self.ready_rx.len()
    }

    /// Number of workers not lost to failed replacements (ready or leased).
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Number of workers currently leased to callers.
    pub fn leased_count(&self) -> usize {
        self.live_count().saturating_sub(self.ready_count())
    }

    /// Configured pool size.
    pub fn capacity(&self) -> usize {
        self.settings.max_invoker_count
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    fn effective_context<'a>(&self, ctx: &'a ExecutionContext) -> Cow<'a, ExecutionContext> {
        match (ctx.deadline(), self.settings.max_runnable_time) {
            (None, Some(max_runnable)) => {
                let mut ctx = ctx.clone();
                ctx.set_deadline(SystemTime::now() + max_runnable);
                Cow::Owned(ctx)
            }
            _ => Cow::Borrowed(ctx),
        }
    }

    fn give_back(&self, invoker: Box<dyn Invoker>) {
        match self.ready_tx.try_send(invoker) {
            Ok(()) => {}
            // The queue is sized to the pool, so this means the live count is off.
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.live.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!("Ready queue rejected a returned invoker, dropping it");
            }
        }
    }

    fn replace(&self) {
        match self.factory.new_invoker() {
            Ok(replacement) => self.give_back(replacement),
            Err(e) => {
                let live = self.live.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
                tracing::warn!(
                    error = %e,
                    live,
                    capacity = self.settings.max_invoker_count,
                    "Could not replace failed invoker, pool shrinks"
                );
            }
        }
    }
}
