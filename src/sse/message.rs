//! Server-Sent Event records.

use std::sync::OnceLock;

use crate::buffer::GatewayBuffer;

/// Length of the blank comment carried by the padding message.
pub const PADDING_LENGTH: usize = 4096;

/// One SSE record. Absent fields are `None`; `data` lines are joined by LF.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseMessage {
    event_type: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
    comment: Option<String>,
    data: Option<GatewayBuffer>,
    location: Option<String>,
    reconnect: bool,
}

impl SseMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record carrying only `data`.
    pub fn data(data: impl Into<GatewayBuffer>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::default()
        }
    }

    /// The shared padding record: a long blank comment that pushes enough
    /// bytes onto the wire to defeat client-side buffering.
    pub fn padding() -> &'static SseMessage {
        static PADDING: OnceLock<SseMessage> = OnceLock::new();
        PADDING.get_or_init(|| SseMessage {
            comment: Some(" ".repeat(PADDING_LENGTH)),
            ..SseMessage::default()
        })
    }

    pub fn is_padding(&self) -> bool {
        self.comment
            .as_ref()
            .is_some_and(|c| c.len() == PADDING_LENGTH)
            && self == SseMessage::padding()
    }

    /// No field has been set.
    pub fn is_empty(&self) -> bool {
        self.event_type.is_none()
            && self.id.is_none()
            && self.retry.is_none()
            && self.comment.is_none()
            && self.data.is_none()
            && self.location.is_none()
            && !self.reconnect
    }

    /// Only `data` is set.
    pub fn is_data_only(&self) -> bool {
        self.data.is_some()
            && self.event_type.is_none()
            && self.id.is_none()
            && self.retry.is_none()
            && self.comment.is_none()
            && self.location.is_none()
            && !self.reconnect
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn retry(&self) -> Option<u64> {
        self.retry
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn data_buffer(&self) -> Option<&GatewayBuffer> {
        self.data.as_ref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn reconnect(&self) -> bool {
        self.reconnect
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_retry(mut self, retry: u64) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<GatewayBuffer>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub(crate) fn into_parts(self) -> SseParts {
        SseParts {
            event_type: self.event_type,
            id: self.id,
            retry: self.retry,
            comment: self.comment,
            data: self.data,
            location: self.location,
            reconnect: self.reconnect,
        }
    }

    pub(crate) fn set_event_type(&mut self, value: String) {
        self.event_type = Some(value);
    }

    pub(crate) fn set_id(&mut self, value: String) {
        self.id = Some(value);
    }

    pub(crate) fn set_retry(&mut self, value: u64) {
        self.retry = Some(value);
    }

    pub(crate) fn set_location(&mut self, value: String) {
        self.location = Some(value);
    }

    pub(crate) fn set_reconnect(&mut self) {
        self.reconnect = true;
    }

    pub(crate) fn append_comment(&mut self, value: &str) {
        match self.comment.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => self.comment = Some(value.to_string()),
        }
    }

    pub(crate) fn data_mut(&mut self) -> &mut Option<GatewayBuffer> {
        &mut self.data
    }
}

/// Owned fields of a message, consumed by the encoder.
pub(crate) struct SseParts {
    pub event_type: Option<String>,
    pub id: Option<String>,
    pub retry: Option<u64>,
    pub comment: Option<String>,
    pub data: Option<GatewayBuffer>,
    pub location: Option<String>,
    pub reconnect: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_is_recognised() {
        assert!(SseMessage::padding().is_padding());
        assert!(SseMessage::padding().clone().is_padding());
        let other = SseMessage::new().with_comment(" ".repeat(PADDING_LENGTH - 1));
        assert!(!other.is_padding());
    }

    #[test]
    fn data_only_detection() {
        assert!(SseMessage::data("x").is_data_only());
        assert!(!SseMessage::data("x").with_id("1").is_data_only());
        assert!(SseMessage::new().is_empty());
    }
}
