use crate::types::{BatchError, MetaMessage};
use bytes::Bytes;
use tracing::{debug, instrument};

/// A decoded inbound batch of protocol messages.
///
/// The wire format is a JSON array of [`MetaMessage`] objects. Single bare
/// objects, non-arrays, and empty arrays are rejected; the transport answers
/// those with a 400.
#[derive(Debug, Default)]
pub struct InboundBatch {
    messages: Vec<MetaMessage>,
}

impl InboundBatch {
    /// Returns the number of messages in the batch.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if the batch holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns an iterator over the messages in the batch, in request order.
    pub fn iter(&self) -> impl Iterator<Item = &MetaMessage> + '_ {
        self.messages.iter()
    }
}

impl TryFrom<Bytes> for InboundBatch {
    type Error = BatchError;

    #[instrument(level = "debug", skip(bytes), fields(buf_len = bytes.len()))]
    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        debug!("Parsing inbound batch");

        let messages: Vec<MetaMessage> = serde_json::from_slice(bytes.as_ref())?;
        if messages.is_empty() {
            return Err(BatchError::Empty);
        }

        Ok(Self { messages })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn batch_of_two() {
        let bytes = Bytes::from_static(
            br#"[{"channel":"/meta/handshake"},{"channel":"/meta/connect","clientId":"x"}]"#,
        );
        let batch = InboundBatch::try_from(bytes).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.iter().next().unwrap().channel, "/meta/handshake");
    }

    #[test]
    fn rejects_single_object() {
        let bytes = Bytes::from_static(br#"{"channel":"/meta/handshake"}"#);
        assert!(matches!(
            InboundBatch::try_from(bytes),
            Err(BatchError::InvalidJson(_))
        ));
    }

    #[test]
    fn rejects_empty_array() {
        let bytes = Bytes::from_static(b"[]");
        assert!(matches!(
            InboundBatch::try_from(bytes),
            Err(BatchError::Empty)
        ));
    }

    #[test]
    fn rejects_garbage() {
        let bytes = Bytes::from_static(b"not json");
        assert!(matches!(
            InboundBatch::try_from(bytes),
            Err(BatchError::InvalidJson(_))
        ));
    }
}
