//! Chunked payload framing for the event store.
//!
//! Oversized tool/transport payloads are split into `DEFAULT_CHUNK_SIZE_BYTES`
//! parts above `DEFAULT_COMPRESSION_THRESHOLD_BYTES` so a single stored event
//! never forces a KV backend to move one giant blob; small payloads pass
//! through as a single part.

use crate::Result;
use crate::constants::{DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_COMPRESSION_THRESHOLD_BYTES};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct ChunkEnvelope {
    parts: Vec<Vec<u8>>,
}

/// Frame a raw payload for storage. Safe to call on any size of input.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    let parts: Vec<Vec<u8>> = if payload.len() > DEFAULT_COMPRESSION_THRESHOLD_BYTES {
        payload
            .chunks(DEFAULT_CHUNK_SIZE_BYTES)
            .map(|c| c.to_vec())
            .collect()
    } else {
        vec![payload.to_vec()]
    };
    Ok(serde_json::to_vec(&ChunkEnvelope { parts })?)
}

/// Reassemble a framed payload back into its original bytes.
pub fn decode(encoded: &[u8]) -> Result<Vec<u8>> {
    let envelope: ChunkEnvelope = serde_json::from_slice(encoded)?;
    Ok(envelope.parts.concat())
}

/// Number of parts a framed payload was split into, for telemetry.
pub fn part_count(encoded: &[u8]) -> Result<usize> {
    let envelope: ChunkEnvelope = serde_json::from_slice(encoded)?;
    Ok(envelope.parts.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_roundtrips_as_single_part() {
        let payload = b"hello world";
        let encoded = encode(payload).unwrap();
        assert_eq!(part_count(&encoded).unwrap(), 1);
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn large_payload_splits_and_reassembles() {
        let payload = vec![7u8; DEFAULT_COMPRESSION_THRESHOLD_BYTES * 3];
        let encoded = encode(&payload).unwrap();
        assert!(part_count(&encoded).unwrap() > 1);
        assert_eq!(decode(&encoded).unwrap(), payload);
    }
}
