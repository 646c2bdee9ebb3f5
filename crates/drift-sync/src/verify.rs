//! Streaming proof verification.
//!
//! [`ProofVerifier`] checks a byte stream against a content hash and its bao
//! outboard proof one chunk at a time. A mismatch surfaces as an
//! [`io::ErrorKind::InvalidData`] read error as soon as the offending chunk is
//! read, so a copy loop over the verifier fails without reading the rest of
//! the stream.

use std::io::{self, Cursor, Read};

use drift_store::ObjectReader;
use drift_types::ContentHash;
use tokio_util::io::SyncIoBridge;
use tracing::debug;

use crate::error::SyncError;

/// Length of the size header at the start of a bao outboard.
const HEADER_LEN: usize = 8;

/// A reader yielding the bytes of `inner` only after they verify.
pub struct ProofVerifier<R: Read> {
    decoder: bao::decode::Decoder<R, Cursor<Vec<u8>>>,
    size: u64,
    read: u64,
}

impl<R: Read> ProofVerifier<R> {
    /// Wrap `inner`, expecting exactly `size` bytes hashing to `hash` under
    /// `proof`.
    ///
    /// Fails up front if the proof does not describe `size` bytes.
    pub fn new(inner: R, hash: &ContentHash, proof: Vec<u8>, size: u64) -> io::Result<Self> {
        let header: [u8; HEADER_LEN] = proof
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| invalid("proof is shorter than its header"))?;
        let declared = u64::from_le_bytes(header);
        if declared != size {
            return Err(invalid(format!(
                "proof covers {declared} bytes, expected {size}"
            )));
        }

        let hash = bao::Hash::from(*hash.as_bytes());
        Ok(Self {
            decoder: bao::decode::Decoder::new_outboard(inner, Cursor::new(proof), &hash),
            size,
            read: 0,
        })
    }

    /// Verified bytes returned so far.
    pub fn verified(&self) -> u64 {
        self.read
    }

    /// Whether the whole stream has been read and verified.
    pub fn is_complete(&self) -> bool {
        self.read == self.size
    }
}

impl<R: Read> Read for ProofVerifier<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.decoder.read(buf)?;
        self.read += n as u64;
        Ok(n)
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Verify a download against `(hash, proof, size)`, discarding its bytes.
///
/// Runs the blocking decoder on the blocking pool. Returns the number of
/// verified bytes.
pub async fn verify_download(
    reader: ObjectReader,
    hash: &ContentHash,
    proof: Vec<u8>,
    size: u64,
) -> Result<u64, SyncError> {
    let mut bridge = SyncIoBridge::new(reader);
    let hash = *hash;

    let verified = tokio::task::spawn_blocking(move || -> io::Result<u64> {
        let mut verifier = ProofVerifier::new(&mut bridge, &hash, proof, size)?;
        let copied = io::copy(&mut verifier, &mut io::sink())?;
        if !verifier.is_complete() {
            return Err(invalid(format!("stream ended after {copied} of {size} bytes")));
        }
        drop(verifier);
        // The decoder stops at the proof's length; anything after is foreign.
        let mut extra = [0u8; 1];
        if bridge.read(&mut extra)? != 0 {
            return Err(invalid(format!("stream is longer than {size} bytes")));
        }
        Ok(copied)
    })
    .await
    .map_err(|e| SyncError::Verification(format!("verifier task failed: {e}")))?;

    match verified {
        Ok(n) => {
            debug!(%hash, bytes = n, "object verified");
            Ok(n)
        }
        Err(e) => Err(SyncError::Verification(e.to_string())),
    }
}
