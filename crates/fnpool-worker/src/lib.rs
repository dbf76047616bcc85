//! Backend side of the fnpool protocol.
//!
//! A backend process reads one request and one execution context from stdin
//! per invocation and answers with exactly one result on stdout. Exiting or
//! staying silent signals failure to the host, which then kills and replaces
//! the process.
//!
//! ```no_run
//! use fnpool_core::{ExecutionContext, Input, InvocationResult};
//!
//! fnpool_worker::serve_stdio(|input: Input, _ctx: ExecutionContext| {
//!     let name = String::from_utf8_lossy(input.data()).into_owned();
//!     InvocationResult::new(format!("Hello, {}!", name)).with_status(200)
//! })?;
//! # Ok::<(), fnpool_core::Error>(())
//! ```

use std::io::{BufReader, BufWriter, Read, Write};

use fnpool_core::ipc::{
    ContextMessage, RequestMessage, ResultMessage, read_message, try_read_message, write_message,
};
use fnpool_core::{ExecutionContext, InvocationResult, Input, Result};

/// Handles one invocation inside a backend process.
pub trait Handler {
    fn handle(&mut self, input: Input, ctx: ExecutionContext) -> InvocationResult;
}

impl<F> Handler for F
where
    F: FnMut(Input, ExecutionContext) -> InvocationResult,
{
    fn handle(&mut self, input: Input, ctx: ExecutionContext) -> InvocationResult {
        self(input, ctx)
    }
}

/// Read the next invocation. Returns `None` when the host closed the stream
/// between invocations.
pub fn read_invocation<R: Read>(reader: &mut R) -> Result<Option<(Input, ExecutionContext)>> {
    let Some(request) = try_read_message::<_, RequestMessage>(reader)? else {
        return Ok(None);
    };
    let context: ContextMessage = read_message(reader)?;
    Ok(Some((Input::from(request), ExecutionContext::from(context))))
}

/// Write the reply to one invocation.
pub fn write_result<W: Write>(writer: &mut W, result: &InvocationResult) -> Result<()> {
    write_message(writer, &ResultMessage::from(result))
}

/// Serve invocations until the host closes the stream.
///
/// Returns the number of invocations answered.
pub fn serve<R, W, H>(reader: &mut R, writer: &mut W, mut handler: H) -> Result<usize>
where
    R: Read,
    W: Write,
    H: Handler,
{
    let mut served = 0;
    while let Some((input, ctx)) = read_invocation(reader)? {
        let result = handler.handle(input, ctx);
        write_result(writer, &result)?;
        served += 1;
        tracing::trace!(served, "Answered invocation");
    }
    Ok(served)
}

/// Serve invocations over this process's stdin/stdout.
pub fn serve_stdio<H: Handler>(handler: H) -> Result<usize> {
    let mut stdin = BufReader::new(std::io::stdin().lock());
    let mut stdout = BufWriter::new(std::io::stdout().lock());
    serve(&mut stdin, &mut stdout, handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::{Duration, SystemTime};

    use fnpool_core::ipc::{read_result, write_invocation};

    #[test]
    fn test_serve_answers_each_invocation() {
        let deadline = SystemTime::now() + Duration::from_secs(30);
        let ctx = ExecutionContext::with_deadline(deadline).with_env([("hello", "world")]);

        let mut requests = Vec::new();
        write_invocation(&mut requests, &Input::new("world"), &ctx).unwrap();
        write_invocation(&mut requests, &Input::new("again"), &ctx).unwrap();

        let mut replies = Vec::new();
        let served = serve(
            &mut Cursor::new(requests),
            &mut replies,
            |input: Input, ctx: ExecutionContext| {
                assert_eq!(ctx.deadline(), Some(deadline));
                let name = String::from_utf8_lossy(input.data()).into_owned();
                InvocationResult::new(format!("Hello, {}!", name))
                    .with_status(200)
                    .with_env(ctx.env().clone())
            },
        )
        .unwrap();

        assert_eq!(served, 2);

        let mut replies = Cursor::new(replies);
        let first = read_result(&mut replies).unwrap();
        assert_eq!(first.data, b"Hello, world!");
        assert_eq!(first.status, 200);
        assert_eq!(first.env["hello"], "world");
        let second = read_result(&mut replies).unwrap();
        assert_eq!(second.data, b"Hello, again!");
    }

    #[test]
    fn test_truncated_invocation_is_error() {
        let ctx = ExecutionContext::with_timeout(Duration::from_secs(30));
        let mut requests = Vec::new();
        write_invocation(&mut requests, &Input::new("world"), &ctx).unwrap();
        requests.truncate(requests.len() - 2);

        let mut replies = Vec::new();
        let result = serve(
            &mut Cursor::new(requests),
            &mut replies,
            |_: Input, _: ExecutionContext| InvocationResult::default(),
        );

        assert!(result.is_err());
        assert!(replies.is_empty());
    }

    #[test]
    fn test_empty_stream_serves_nothing() {
        let mut replies = Vec::new();
        let served = serve(
            &mut Cursor::new(Vec::new()),
            &mut replies,
            |_: Input, _: ExecutionContext| InvocationResult::default(),
        )
        .unwrap();
        assert_eq!(served, 0);
    }
}
