//! Chunk splitting
//!
//! Partitions a buffer into contiguous, ordered byte ranges. Chunks share the
//! parent buffer through [`Bytes`], so splitting never copies payload data.

use crate::common::{ChunkFlowError, Result};
use bytes::Bytes;

/// A contiguous slice of an input buffer with its sequence index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position in the chunk sequence
    pub index: usize,
    /// Chunk payload
    pub data: Bytes,
}

impl Chunk {
    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Split `buffer` into chunks of at most `chunk_size` bytes
///
/// Every byte is covered exactly once and only the last chunk may be shorter
/// than `chunk_size`. An empty buffer yields no chunks.
///
/// # Errors
/// Returns [`ChunkFlowError::InvalidConfig`] when `chunk_size` is zero.
pub fn split_chunks(buffer: &Bytes, chunk_size: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(ChunkFlowError::InvalidConfig(
            "chunk size must be greater than zero".to_string(),
        ));
    }

    let count = buffer.len().div_ceil(chunk_size);
    let chunks = (0..count)
        .map(|index| {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(buffer.len());
            Chunk {
                index,
                data: buffer.slice(start..end),
            }
        })
        .collect();

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_multiple() {
        let buffer = Bytes::from(vec![7u8; 30]);
        let chunks = split_chunks(&buffer, 10).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() == 10));
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_short_final_chunk() {
        let buffer = Bytes::from_static(b"abcdefghijk");
        let chunks = split_chunks(&buffer, 4).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(&chunks[0].data[..], b"abcd");
        assert_eq!(&chunks[2].data[..], b"ijk");
    }

    #[test]
    fn test_empty_buffer() {
        let chunks = split_chunks(&Bytes::new(), 16).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_chunk_larger_than_buffer() {
        let buffer = Bytes::from_static(b"tiny");
        let chunks = split_chunks(&buffer, 1024).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0].data[..], b"tiny");
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let result = split_chunks(&Bytes::from_static(b"x"), 0);
        assert!(matches!(result, Err(ChunkFlowError::InvalidConfig(_))));
    }
}
