use courier_shared::crypto;
use courier_shared::protocol::{NewMessage, SegmentMessage};
use courier_shared::WireError;

/// Splits outbound frames that would not fit the transport.
///
/// Chunks are at most three quarters of the transport limit, leaving room for
/// the segment header and the transport's own envelope.
/// The division happens first (`max / 4 * 3`), so a limit that is not a
/// multiple of four rounds down to the nearest multiple before scaling.
/// Peers compute the same size this way.
#[derive(Debug, Clone, Copy)]
pub struct SegmentCodec {
    max_segment_size: usize,
}

impl SegmentCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_segment_size: (max_message_size / 4 * 3).max(1),
        }
    }

    pub fn max_segment_size(&self) -> usize {
        self.max_segment_size
    }

    /// Frames to send, in index order. A frame that fits is returned as is.
    pub fn segment(&self, message: NewMessage) -> Result<Vec<NewMessage>, WireError> {
        if message.payload.len() <= self.max_segment_size {
            return Ok(vec![message]);
        }

        let entire_message_hash = crypto::hash(&message.payload);
        let chunks: Vec<&[u8]> = message.payload.chunks(self.max_segment_size).collect();
        let segments_count = chunks.len() as u32;

        let mut frames = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.into_iter().enumerate() {
            let segment = SegmentMessage {
                entire_message_hash,
                index: index as u32,
                segments_count,
                payload: chunk.to_vec(),
            };
            frames.push(message.with_payload(segment.encode()?));
        }

        tracing::debug!(
            segments = segments_count,
            payload_len = message.payload.len(),
            max_segment_size = self.max_segment_size,
            "message segmented"
        );

        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_frame_untouched() {
        let codec = SegmentCodec::new(100);
        let frame = NewMessage::new(vec![1; 75]);
        assert_eq!(codec.segment(frame.clone()).unwrap(), vec![frame]);
    }

    #[test]
    fn test_threshold_is_three_quarters() {
        assert_eq!(SegmentCodec::new(100_000).max_segment_size(), 75_000);
        assert_eq!(SegmentCodec::new(0).max_segment_size(), 1);
        // Divides before scaling: 10 / 4 * 3, not floor(10 * 3 / 4).
        assert_eq!(SegmentCodec::new(10).max_segment_size(), 6);
    }

    #[test]
    fn test_splits_and_keeps_frame_settings() {
        let codec = SegmentCodec::new(100_000);
        let payload: Vec<u8> = (0..140_000u32).map(|i| i as u8).collect();
        let frame = NewMessage::new(payload.clone()).with_pubsub_topic(Some("topic".into()));

        let frames = codec.segment(frame).unwrap();
        assert_eq!(frames.len(), 2);

        let mut joined = Vec::new();
        for (i, f) in frames.iter().enumerate() {
            assert_eq!(f.pubsub_topic.as_deref(), Some("topic"));
            let segment = SegmentMessage::decode(&f.payload).unwrap().unwrap();
            assert_eq!(segment.index, i as u32);
            assert_eq!(segment.segments_count, 2);
            assert_eq!(segment.entire_message_hash, crypto::hash(&payload));
            joined.extend_from_slice(&segment.payload);
        }
        assert_eq!(joined, payload);
    }
}
