//! Incremental bao outboard construction.

use std::io::{Cursor, Write};

use drift_types::ContentHash;

/// Builds the bao outboard proof and content hash of a byte stream fed in
/// arbitrary pieces, without holding the stream itself.
pub struct ProofBuilder {
    encoder: bao::encode::Encoder<Cursor<Vec<u8>>>,
    len: u64,
}

impl ProofBuilder {
    /// Start a new, empty proof.
    pub fn new() -> Self {
        Self {
            encoder: bao::encode::Encoder::new_outboard(Cursor::new(Vec::new())),
            len: 0,
        }
    }

    /// Feed the next piece of the stream.
    pub fn update(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.encoder.write_all(data)?;
        self.len += data.len() as u64;
        Ok(())
    }

    /// Bytes fed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing has been fed yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finish the tree, returning the content hash and outboard bytes.
    pub fn finish(mut self) -> std::io::Result<(ContentHash, Vec<u8>)> {
        let hash = self.encoder.finalize()?;
        let outboard = self.encoder.into_inner().into_inner();
        Ok((ContentHash::from(*hash.as_bytes()), outboard))
    }
}

impl Default for ProofBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Content hash and outboard of an in-memory buffer.
pub fn outboard(data: &[u8]) -> (ContentHash, Vec<u8>) {
    let (outboard, hash) = bao::encode::outboard(data);
    (ContentHash::from(*hash.as_bytes()), outboard)
}
