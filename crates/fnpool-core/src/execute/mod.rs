//! Invocation engine.
//!
//! # Architecture
//!
//! ```text
//! caller
//!     │
//!     └── InvokerPool::invoke
//!             │
//!             ├── lease a ready invoker (bounded by max_wait)
//!             │
//!             └── Invoker::invoke (bounded by the context deadline)
//!                     │
//!                     ├── Ok  → invoker goes back to the ready queue
//!                     └── Err → invoker dropped, factory builds a replacement
//! ```
//!
//! # Module Structure
//!
//! - `context` - Input, ExecutionContext and InvocationResult
//! - `invoker` - Invoker and InvokerFactory traits
//! - `pool` - InvokerPool

mod context;
mod invoker;
mod pool;

pub use context::{ExecutionContext, InvocationResult, Input};
pub use invoker::{Invoker, InvokerFactory};
pub use pool::InvokerPool;
