//! Wire types shared by the chat server and the chat client.
//!
//! - [`message`]: chat transcript (`ChatMessage`, parts, tool invocations) and
//!   the request body.
//! - [`stream`]: the line-oriented data stream the server emits while a turn
//!   is running.
//! - [`envelope`]: the JSON error envelope returned instead of a stream, and
//!   its `X-DB-Error` side-channel header.

pub mod envelope;
pub mod message;
pub mod stream;

pub use envelope::{parse_db_error_header, stream_failure_text, ErrorEnvelope, DB_ERROR_HEADER};
pub use message::{
    new_message_id, ChatMessage, ChatRequest, ChatRole, DbError, FixRequest, InvocationState,
    MessagePart, ToolInvocation,
};
pub use stream::{FinishReason, StreamDecoder, StreamPart, DATA_STREAM_HEADER};
