//! Client-side chat session.
//!
//! [`ChatSession`] owns the transcript and the AutoFix state. It keeps at most
//! one request in flight, tracks the last database error from both the
//! `X-DB-Error` header and the messages themselves, and re-issues the last
//! turn in repair mode on [`ChatSession::auto_fix`].

pub mod builder;
pub mod clipboard;
pub mod render;
pub mod transport;

pub use builder::MessageBuilder;
pub use transport::{
    ChatReply, ChatTransport, HttpTransport, HttpTransportConfig, InProcessTransport, ReplyBody,
};

use futures::StreamExt;
use std::sync::Arc;

use crate::error::{PgChatError, Result};
use crate::protocol::{
    new_message_id, parse_db_error_header, ChatMessage, ChatRequest, DbError, MessagePart,
    StreamPart,
};
use crate::settings::Settings;

/// Marker identifying a database error in assistant text.
const DB_ERROR_MARKER: &str = "Database Error:";

/// One chat conversation.
pub struct ChatSession {
    transport: Arc<dyn ChatTransport>,
    settings: Settings,
    messages: Vec<ChatMessage>,
    input: String,
    is_loading: bool,
    db_error: Option<DbError>,
    fix_context: String,
    is_fixing: bool,
}

impl ChatSession {
    /// Creates a session using a settings snapshot for every request.
    pub fn new(transport: Arc<dyn ChatTransport>, settings: Settings) -> Self {
        Self {
            transport,
            settings,
            messages: Vec::new(),
            input: String::new(),
            is_loading: false,
            db_error: None,
            fix_context: String::new(),
            is_fixing: false,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn is_fixing(&self) -> bool {
        self.is_fixing
    }

    /// The error AutoFix would repair, if any.
    pub fn db_error(&self) -> Option<&DbError> {
        self.db_error.as_ref()
    }

    pub fn fix_context(&self) -> &str {
        &self.fix_context
    }

    /// Sets the hint sent along with the next AutoFix.
    pub fn set_fix_context(&mut self, context: impl Into<String>) {
        self.fix_context = context.into();
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Applies the `X-DB-Error` header of a reply.
    ///
    /// An absent or unparseable header clears the error.
    pub fn handle_response(&mut self, db_error_header: Option<&str>) {
        self.db_error = db_error_header.and_then(parse_db_error_header);
        self.is_fixing = false;
    }

    /// Rescans the latest assistant message for an error.
    pub fn on_messages_updated(&mut self) {
        if let Some(found) = self
            .messages
            .iter()
            .rev()
            .find(|m| m.is_assistant())
            .and_then(message_db_error)
        {
            self.db_error = Some(found);
        }
    }

    /// Starts a turn for `text`, returning the request to send.
    pub fn begin_submit(&mut self, text: &str) -> Result<ChatRequest> {
        if self.is_loading {
            return Err(PgChatError::session("A request is already in progress"));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(PgChatError::session("Message is empty"));
        }

        self.messages.push(ChatMessage::user(text));
        self.input.clear();
        self.db_error = None;
        self.is_loading = true;

        Ok(self.base_request())
    }

    /// Starts a repair turn for the current database error.
    ///
    /// The error and the hint are cleared before dispatch; the reply sets
    /// them again if the repair fails too.
    pub fn begin_auto_fix(&mut self) -> Result<ChatRequest> {
        if self.is_loading {
            return Err(PgChatError::session("A request is already in progress"));
        }
        let fix_error = self
            .db_error
            .take()
            .ok_or_else(|| PgChatError::session("There is no database error to fix"))?;

        let context = std::mem::take(&mut self.fix_context);
        let context = context.trim();

        self.is_fixing = true;
        self.is_loading = true;

        let mut request = self.base_request();
        request.fix_error = Some(fix_error);
        request.fix_context = (!context.is_empty()).then(|| context.to_string());
        Ok(request)
    }

    /// Folds a reply into a new assistant message.
    ///
    /// `on_update` sees the message after every stream part, and the message
    /// is scanned for a database error each time.
    pub async fn receive(
        &mut self,
        reply: ChatReply,
        mut on_update: impl FnMut(&ChatMessage) + Send,
    ) -> &ChatMessage {
        self.handle_response(reply.db_error_header.as_deref());

        let message = match reply.body {
            ReplyBody::Envelope(envelope) => envelope.into_message(),
            ReplyBody::Stream(mut parts) => {
                let mut builder = MessageBuilder::new();
                while let Some(part) = parts.next().await {
                    match part {
                        Ok(part) => builder.apply(part),
                        Err(e) => {
                            tracing::warn!(error = %e, "Chat stream failed");
                            builder.apply(StreamPart::Error(format!("⚠️ Error: {}", e.message())));
                            self.on_message_streamed(builder.message());
                            on_update(builder.message());
                            break;
                        }
                    }
                    self.on_message_streamed(builder.message());
                    on_update(builder.message());
                }
                builder.finish()
            }
        };

        self.finish_turn(message)
    }

    /// Ends the in-flight turn after the request itself failed.
    ///
    /// The failure is shown in the transcript but is not offered to AutoFix.
    pub fn fail(&mut self, error: &PgChatError) -> &ChatMessage {
        self.is_fixing = false;
        let text = format!("⚠️ Error: {}", error.message());
        let mut message = ChatMessage::assistant(new_message_id());
        message.content = text.clone();
        message.parts = vec![MessagePart::Text { text }];
        self.finish_turn(message)
    }

    /// Sends `text` and waits for the whole reply.
    pub async fn submit(&mut self, text: &str) -> Result<&ChatMessage> {
        self.submit_with(text, |_| {}).await
    }

    /// Like [`ChatSession::submit`], reporting progress to `on_update`.
    pub async fn submit_with(
        &mut self,
        text: &str,
        on_update: impl FnMut(&ChatMessage) + Send,
    ) -> Result<&ChatMessage> {
        let request = self.begin_submit(text)?;
        Ok(self.dispatch(request, on_update).await)
    }

    /// Re-issues the last turn in repair mode.
    pub async fn auto_fix(&mut self) -> Result<&ChatMessage> {
        self.auto_fix_with(|_| {}).await
    }

    /// Like [`ChatSession::auto_fix`], reporting progress to `on_update`.
    pub async fn auto_fix_with(
        &mut self,
        on_update: impl FnMut(&ChatMessage) + Send,
    ) -> Result<&ChatMessage> {
        let request = self.begin_auto_fix()?;
        Ok(self.dispatch(request, on_update).await)
    }

    async fn dispatch(
        &mut self,
        request: ChatRequest,
        on_update: impl FnMut(&ChatMessage) + Send,
    ) -> &ChatMessage {
        let transport = Arc::clone(&self.transport);
        match transport.send(&request).await {
            Ok(reply) => self.receive(reply, on_update).await,
            Err(e) => {
                tracing::warn!(error = %e, "Chat request failed");
                self.fail(&e)
            }
        }
    }

    fn base_request(&self) -> ChatRequest {
        ChatRequest {
            messages: self.messages.clone(),
            api_key: self.settings.api_key.clone(),
            db_url: self.settings.db_url.clone(),
            custom_instructions: self.settings.custom_instructions.clone(),
            fix_error: None,
            fix_context: None,
        }
    }

    /// Applies [`ChatSession::on_messages_updated`] to the message still
    /// being streamed.
    fn on_message_streamed(&mut self, message: &ChatMessage) {
        if let Some(found) = message_db_error(message) {
            self.db_error = Some(found);
        }
    }

    fn finish_turn(&mut self, message: ChatMessage) -> &ChatMessage {
        self.messages.push(message);
        self.is_loading = false;
        self.on_messages_updated();
        let index = self.messages.len() - 1;
        &self.messages[index]
    }
}

/// The database error an assistant message reports, if any.
fn message_db_error(message: &ChatMessage) -> Option<DbError> {
    message
        .error_details
        .clone()
        .or_else(|| marker_message(&message.text()).map(DbError::new))
}

/// Pulls the error message out of text carrying the database error marker.
fn marker_message(text: &str) -> Option<String> {
    let (_, rest) = text.split_once(DB_ERROR_MARKER)?;
    let message = rest.split("\n\n").next().unwrap_or_default().trim();
    Some(if message.is_empty() {
        crate::orchestrator::prompt::UNKNOWN_DB_ERROR.to_string()
    } else {
        message.to_string()
    })
}
