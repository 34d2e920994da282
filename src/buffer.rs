//! Element payloads flowing through the pipeline.

use bytes::Bytes;

/// A single pipeline element: an owned byte payload plus a sequence number.
///
/// flowtune never inspects payload contents; it only needs the byte length
/// for the per-stage counters. Stages are free to encode whatever they like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    data: Bytes,
    sequence: u64,
}

impl Buffer {
    /// Create a buffer from a byte payload and a sequence number.
    pub fn new(data: impl Into<Bytes>, sequence: u64) -> Self {
        Self {
            data: data.into(),
            sequence,
        }
    }

    /// Get the payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get the payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Take the payload out of the buffer.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_basics() {
        let buf = Buffer::new(vec![1u8, 2, 3], 7);
        assert_eq!(buf.len(), 3);
        assert!(!buf.is_empty());
        assert_eq!(buf.sequence(), 7);
        assert_eq!(buf.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_buffer_empty() {
        let buf = Buffer::new(Vec::<u8>::new(), 0);
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
    }
}
