//! Network message traits.

/// Marker for types that travel between replicas.
///
/// The transport uses `message_type_id` for topic/route naming; framing is
/// the transport's concern.
pub trait NetworkMessage {
    /// Stable identifier for this message type.
    fn message_type_id() -> &'static str;
}
