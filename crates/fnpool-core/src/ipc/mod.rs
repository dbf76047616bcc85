//! Inter-process communication with backend processes.
//!
//! This module provides the wire protocol and the process-backed invoker
//! that speaks it over a child's stdin/stdout.

pub mod protocol;
mod process;

pub use process::{InvokerState, ProcessInvoker, ProcessInvokerFactory};
pub use protocol::{
    ContextMessage, EnvVar, Message, RequestMessage, ResultMessage, Timestamp, read_message,
    read_result, try_read_message, write_invocation, write_message,
};
