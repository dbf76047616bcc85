//! Values that flow through one invocation.
//!
//! An [`ExecutionContext`] is passed explicitly into every invoke call; there
//! is no ambient or thread-local state carrying the environment or deadline.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime};

/// Request body handed to a backend. Opaque to fnpool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Input {
    data: Vec<u8>,
}

impl Input {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Per-call environment plus the absolute deadline the backend must meet.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use fnpool_core::ExecutionContext;
///
/// let ctx = ExecutionContext::with_timeout(Duration::from_secs(5))
///     .with_env([("REQUEST_ID", "42")]);
///
/// assert!(ctx.deadline().is_some());
/// assert_eq!(ctx.env()["REQUEST_ID"], "42");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    env: BTreeMap<String, String>,
    deadline: Option<SystemTime>,
}

impl ExecutionContext {
    /// Create a context with no environment and no deadline.
    ///
    /// Invokers reject such a context with `Error::MissingDeadline` unless a
    /// deadline is attached before the call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(SystemTime::now() + timeout)
    }

    /// Create a context with an absolute deadline.
    pub fn with_deadline(deadline: SystemTime) -> Self {
        Self {
            env: BTreeMap::new(),
            deadline: Some(deadline),
        }
    }

    /// Add environment entries. Later entries replace earlier ones with the
    /// same name.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn set_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.insert(name.into(), value.into());
    }

    pub fn set_deadline(&mut self, deadline: SystemTime) {
        self.deadline = Some(deadline);
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn deadline(&self) -> Option<SystemTime> {
        self.deadline
    }

    /// Time left until the deadline. Zero once it has passed, `None` without
    /// a deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| {
            deadline
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO)
        })
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }
}

/// What a backend returned for one invocation.
///
/// `status` is backend-defined (an HTTP-like code, an exit code, ...), and
/// `env` carries out-of-band metadata such as header pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationResult {
    pub status: i32,
    pub data: Vec<u8>,
    pub env: HashMap<String, String>,
}

impl InvocationResult {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: i32) -> Self {
        self.status = status;
        self
    }

    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}
