//! Core engine for fnpool, a pool of process-backed function invokers.
//!
//! This crate provides:
//! - The `Invoker` / `InvokerFactory` capabilities
//! - A length-prefixed wire protocol for talking to backend processes
//! - `ProcessInvoker`, which runs calls in a reusable child process and kills
//!   it on any failure or missed deadline
//! - `InvokerPool`, a bounded pool that leases invokers and replaces failed ones
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use fnpool_core::{
//!     ExecutionContext, Input, InvokerPool, PoolSettings, ProcessInvokerFactory, ProcessTemplate,
//! };
//!
//! let factory = ProcessInvokerFactory::new(ProcessTemplate::new("my-function"));
//! let pool = InvokerPool::new(PoolSettings::default(), factory)?;
//!
//! let ctx = ExecutionContext::with_timeout(Duration::from_secs(2));
//! let result = pool.invoke(&Input::new("world"), &ctx)?;
//! println!("{}", String::from_utf8_lossy(&result.data));
//! # Ok::<(), fnpool_core::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod execute;
pub mod ipc;

pub use config::{PoolConfig, PoolSettings, ProcessTemplate};
pub use error::{Error, Result};
pub use execute::{ExecutionContext, InvocationResult, Input, Invoker, InvokerFactory, InvokerPool};
pub use ipc::{InvokerState, ProcessInvoker, ProcessInvokerFactory};
