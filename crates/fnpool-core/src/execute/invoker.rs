//! Invoker and factory capabilities.

use crate::error::Result;

use super::context::{ExecutionContext, InvocationResult, Input};

/// Something that can be called with an input and context and returns a
/// result. Process-backed invokers are one implementation; in-process or
/// networked backends fit the same trait.
///
/// Invokers are leased exclusively: `&mut self` guarantees a single caller
/// drives an instance at a time.
pub trait Invoker: Send {
    /// Run one invocation.
    ///
    /// Implementations must honor `ctx.deadline()`: once it passes the call
    /// aborts, releases any process it owns and returns
    /// `Error::ExecutionTimeout`.
    ///
    /// An error is terminal. Callers must not invoke the same instance again
    /// after a failure; replacing it is the pool's job.
    fn invoke(&mut self, input: &Input, ctx: &ExecutionContext) -> Result<InvocationResult>;
}

impl<I: Invoker + ?Sized> Invoker for Box<I> {
    fn invoke(&mut self, input: &Input, ctx: &ExecutionContext) -> Result<InvocationResult> {
        (**self).invoke(input, ctx)
    }
}

/// Builds fresh, ready-to-use invokers from a fixed template.
pub trait InvokerFactory: Send + Sync {
    fn new_invoker(&self) -> Result<Box<dyn Invoker>>;
}

impl<F> InvokerFactory for F
where
    F: Fn() -> Result<Box<dyn Invoker>> + Send + Sync,
{
    fn new_invoker(&self) -> Result<Box<dyn Invoker>> {
        self()
    }
}
