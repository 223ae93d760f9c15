//! Builder for outgoing messages.

use bytes::{Bytes, BytesMut};

use blip_proto::{MessageNo, MessageType, properties, varint};

use super::Priority;

/// A message being composed by the application.
///
/// Fill in properties and body, then hand the builder to
/// [`Engine::send_request`](crate::Engine::send_request) (or return it
/// from a request handler to have it sent as the response). Builders are
/// chainable by value:
///
/// ```
/// use blip_core::MessageBuf;
///
/// let msg = MessageBuf::request()
///     .profile("Insult")
///     .property("Language", "French")
///     .body(b"Your mother was a hamster");
/// ```
#[derive(Debug, Clone)]
pub struct MessageBuf {
    pub(crate) message_type: MessageType,
    pub(crate) properties: BytesMut,
    pub(crate) body: BytesMut,
    pub(crate) priority: Priority,
    pub(crate) compressed: bool,
    pub(crate) no_reply: bool,
    pub(crate) response_to: MessageNo,
}

impl MessageBuf {
    fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            properties: BytesMut::new(),
            body: BytesMut::new(),
            priority: Priority::Normal,
            compressed: false,
            no_reply: false,
            response_to: 0,
        }
    }

    /// An empty request.
    #[must_use]
    pub fn request() -> Self {
        Self::new(MessageType::Request)
    }

    /// An empty successful response. The engine fills in the request
    /// number when the response is queued.
    #[must_use]
    pub fn response() -> Self {
        Self::new(MessageType::Response)
    }

    /// An error response carrying `Error-Code` (and `Error-Domain` when it
    /// differs from the default `BLIP` domain) with `message` as body.
    #[must_use]
    pub fn error(domain: &str, code: i64, message: &str) -> Self {
        let mut buf = Self::new(MessageType::Error);
        buf = buf.property(properties::ERROR_CODE, &code.to_string());
        if domain != properties::BLIP_ERROR_DOMAIN {
            buf = buf.property(properties::ERROR_DOMAIN, domain);
        }
        buf.body(message.as_bytes())
    }

    /// Set the `Profile` property, which names the request handler.
    #[must_use]
    pub fn profile(self, profile: &str) -> Self {
        self.property(properties::PROFILE, profile)
    }

    /// Append a property pair. Pairs keep their insertion order on the
    /// wire.
    ///
    /// # Panics
    ///
    /// Panics if `key` or `value` contains a NUL byte.
    #[must_use]
    pub fn property(mut self, key: &str, value: &str) -> Self {
        properties::encode_pair(&mut self.properties, key, value);
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn body(mut self, body: &[u8]) -> Self {
        self.body.clear();
        self.body.extend_from_slice(body);
        self
    }

    /// Append to the body.
    #[must_use]
    pub fn append_body(mut self, body: &[u8]) -> Self {
        self.body.extend_from_slice(body);
        self
    }

    /// Request expedited delivery.
    #[must_use]
    pub fn urgent(mut self, on: bool) -> Self {
        self.priority = if on { Priority::Urgent } else { Priority::Normal };
        self
    }

    /// Compress the payload (subject to the engine's compression setting).
    #[must_use]
    pub fn compressed(mut self, on: bool) -> Self {
        self.compressed = on;
        self
    }

    /// Mark a request as wanting no response.
    #[must_use]
    pub fn no_reply(mut self, on: bool) -> Self {
        self.no_reply = on;
        self
    }

    /// Address a response at the request it answers. Only needed when a
    /// response is sent through [`Engine::send_response`] directly rather
    /// than returned from a handler.
    ///
    /// [`Engine::send_response`]: crate::Engine::send_response
    #[must_use]
    pub fn respond_to(mut self, number: MessageNo) -> Self {
        self.response_to = number;
        self
    }

    /// The kind of message being built.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The encoded payload: a varint property-block length, the property
    /// block, then the body.
    pub(crate) fn encode_payload(&self) -> Bytes {
        let mut payload =
            BytesMut::with_capacity(varint::MAX_LEN + self.properties.len() + self.body.len());
        varint::write(self.properties.len() as u64, &mut payload);
        payload.extend_from_slice(&self.properties);
        payload.extend_from_slice(&self.body);
        payload.freeze()
    }
}

#[cfg(test)]
mod tests {
    use blip_proto::properties;

    use super::*;

    #[test]
    fn payload_layout() {
        let buf = MessageBuf::request().profile("Echo").body(b"hello");
        let payload = buf.encode_payload();
        // one varint byte for the 13-byte block, the block, then the body
        assert_eq!(payload[0], 13);
        assert_eq!(&payload[1..14], b"Profile\0Echo\0");
        assert_eq!(&payload[14..], b"hello");
    }

    #[test]
    fn empty_message_payload_is_one_byte() {
        assert_eq!(&MessageBuf::request().encode_payload()[..], &[0]);
    }

    #[test]
    fn error_builder_sets_code_and_domain() {
        let buf = MessageBuf::error("HTTP", 404, "not found");
        assert_eq!(properties::get(&buf.properties, properties::ERROR_CODE), Some("404"));
        assert_eq!(properties::get(&buf.properties, properties::ERROR_DOMAIN), Some("HTTP"));
        assert_eq!(&buf.body[..], b"not found");
    }

    #[test]
    fn default_domain_is_omitted() {
        let buf = MessageBuf::error("BLIP", 501, "boom");
        assert_eq!(properties::get(&buf.properties, properties::ERROR_CODE), Some("501"));
        assert_eq!(properties::get(&buf.properties, properties::ERROR_DOMAIN), None);
    }
}
