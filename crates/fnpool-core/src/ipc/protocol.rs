//! Wire protocol between the host and backend processes.
//!
//! Uses length-prefixed rkyv messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + rkyv-encoded message.
//!
//! Per invocation the host writes one [`RequestMessage`] followed by one
//! [`ContextMessage`]; the backend answers with exactly one [`ResultMessage`].

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::execute::{ExecutionContext, InvocationResult, Input};

/// Largest message body accepted from the stream (100MB).
pub const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// One `name=value` pair carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Absolute point in time as seconds and nanoseconds since the Unix epoch.
///
/// Instants before the epoch use negative `seconds` with non-negative
/// `nanos`, so `nanos` always counts forward from `seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Self {
                seconds: after.as_secs() as i64,
                nanos: after.subsec_nanos(),
            },
            Err(err) => {
                let before = err.duration();
                let mut seconds = -(before.as_secs() as i64);
                let mut nanos = 0;
                if before.subsec_nanos() > 0 {
                    seconds -= 1;
                    nanos = 1_000_000_000 - before.subsec_nanos();
                }
                Self { seconds, nanos }
            }
        }
    }

    pub fn to_system_time(self) -> SystemTime {
        if self.seconds >= 0 {
            UNIX_EPOCH + Duration::new(self.seconds as u64, self.nanos)
        } else {
            UNIX_EPOCH - Duration::from_secs(self.seconds.unsigned_abs())
                + Duration::from_nanos(u64::from(self.nanos))
        }
    }
}

/// Request payload, written first.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct RequestMessage {
    pub data: Vec<u8>,
}

/// Execution context, written right after the request.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ContextMessage {
    pub env_vars: Vec<EnvVar>,
    pub stop_time: Timestamp,
}

/// The backend's sole reply to one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ResultMessage {
    pub status: i32,
    pub data: Vec<u8>,
    pub env_vars: Vec<EnvVar>,
}

/// A message shape that can travel over the wire.
pub trait Message: Sized {
    /// Short name used in error messages.
    const KIND: &'static str;

    fn encode(&self) -> Result<AlignedVec>;

    fn decode(bytes: &[u8]) -> Result<Self>;
}

macro_rules! impl_message {
    ($ty:ty, $kind:literal) => {
        impl Message for $ty {
            const KIND: &'static str = $kind;

            fn encode(&self) -> Result<AlignedVec> {
                rkyv::to_bytes::<rkyv::rancor::Error>(self).map_err(|e| {
                    Error::Write(format!("failed to encode {} message: {}", Self::KIND, e))
                })
            }

            fn decode(bytes: &[u8]) -> Result<Self> {
                // Replies come from processes we do not trust to honor framing,
                // so always validate before deserializing.
                rkyv::from_bytes::<$ty, rkyv::rancor::Error>(bytes).map_err(|e| {
                    Error::Decode(format!("malformed {} message: {}", Self::KIND, e))
                })
            }
        }
    };
}

impl_message!(RequestMessage, "request");
impl_message!(ContextMessage, "execution context");
impl_message!(ResultMessage, "result");

/// Write a message to a writer using length-prefixed rkyv encoding.
pub fn write_message<W: Write, M: Message>(writer: &mut W, message: &M) -> Result<()> {
    let bytes = message.encode()?;

    let len = u32::try_from(bytes.len()).map_err(|_| {
        Error::Write(format!("{} message too large: {} bytes", M::KIND, bytes.len()))
    })?;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Write(format!("failed to write {} length: {}", M::KIND, e)))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Write(format!("failed to write {} body: {}", M::KIND, e)))?;
    writer
        .flush()
        .map_err(|e| Error::Write(format!("failed to flush {} message: {}", M::KIND, e)))?;

    Ok(())
}

/// Read one message, failing on EOF.
pub fn read_message<R: Read, M: Message>(reader: &mut R) -> Result<M> {
    try_read_message(reader)?.ok_or_else(|| {
        Error::Decode(format!(
            "stream closed before a {} message was received",
            M::KIND
        ))
    })
}

/// Read one message, returning `None` on a clean EOF before the first byte.
///
/// An EOF anywhere inside a record is a truncation error.
pub fn try_read_message<R: Read, M: Message>(reader: &mut R) -> Result<Option<M>> {
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        match reader.read(&mut len_bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(Error::Decode(format!(
                    "truncated {} length prefix ({} of 4 bytes)",
                    M::KIND,
                    filled
                )));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                return Err(Error::Decode(format!(
                    "failed to read {} length: {}",
                    M::KIND,
                    e
                )));
            }
        }
    }
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_LEN {
        return Err(Error::Decode(format!(
            "{} message too large: {} bytes",
            M::KIND,
            len
        )));
    }

    // rkyv validation needs the archive aligned in memory.
    let mut bytes = AlignedVec::<16>::with_capacity(len);
    bytes.resize(len, 0);
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Decode(format!("failed to read {} body: {}", M::KIND, e)))?;

    M::decode(&bytes).map(Some)
}

/// Write one invocation (request then execution context) to a backend.
pub fn write_invocation<W: Write>(
    writer: &mut W,
    input: &Input,
    ctx: &ExecutionContext,
) -> Result<()> {
    let context = ContextMessage::try_from(ctx)?;
    write_message(writer, &RequestMessage::from(input))?;
    write_message(writer, &context)
}

/// Encode one invocation into a single buffer, ready to be written in one go.
pub fn encode_invocation(input: &Input, ctx: &ExecutionContext) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(input.data().len() + 64);
    write_invocation(&mut frame, input, ctx)?;
    Ok(frame)
}

/// Read one backend reply.
pub fn read_result<R: Read>(reader: &mut R) -> Result<InvocationResult> {
    read_message::<_, ResultMessage>(reader).map(InvocationResult::from)
}

impl From<&Input> for RequestMessage {
    fn from(input: &Input) -> Self {
        Self {
            data: input.data().to_vec(),
        }
    }
}

impl From<RequestMessage> for Input {
    fn from(message: RequestMessage) -> Self {
        Input::new(message.data)
    }
}

impl TryFrom<&ExecutionContext> for ContextMessage {
    type Error = Error;

    fn try_from(ctx: &ExecutionContext) -> Result<Self> {
        let deadline = ctx.deadline().ok_or(Error::MissingDeadline)?;
        Ok(Self {
            env_vars: ctx
                .env()
                .iter()
                .map(|(name, value)| EnvVar {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
            stop_time: Timestamp::from_system_time(deadline),
        })
    }
}

impl From<ContextMessage> for ExecutionContext {
    fn from(message: ContextMessage) -> Self {
        ExecutionContext::with_deadline(message.stop_time.to_system_time())
            .with_env(message.env_vars.into_iter().map(|var| (var.name, var.value)))
    }
}

impl From<&InvocationResult> for ResultMessage {
    fn from(result: &InvocationResult) -> Self {
        let mut env_vars: Vec<EnvVar> = result
            .env
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        env_vars.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            status: result.status,
            data: result.data.clone(),
            env_vars,
        }
    }
}

impl From<ResultMessage> for InvocationResult {
    fn from(message: ResultMessage) -> Self {
        // Later duplicates overwrite earlier ones.
        let env: HashMap<String, String> = message
            .env_vars
            .into_iter()
            .map(|var| (var.name, var.value))
            .collect();

        InvocationResult {
            status: message.status,
            data: message.data,
            env,
        }
    }
}
