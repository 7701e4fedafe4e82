/// One validated chunk as seen by host consumers.
///
/// `sequence` is assigned locally when the chunk is accepted; the wire
/// carries no sequence number, so a lost notification leaves no gap here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedChunk {
    pub sequence: u64,
    pub samples: Vec<i16>,
}

impl DecodedChunk {
    /// Little-endian PCM bytes, as they arrived on the wire.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        crate::protocol::encode_chunk_vec(&self.samples)
    }

    /// Duration of this chunk at `sample_rate`.
    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.samples.len() as f64 / sample_rate.max(1) as f64
    }
}
