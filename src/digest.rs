//! Digest parsing, classification, and computation.
//!
//! The wire digest type itself (`<algorithm>:<hex-or-base64url>`) is
//! [`oci_spec::image::Digest`] — re-exported here as [`Digest`] so callers
//! don't need a second crate in scope. What this module adds on top is the
//! piece `oci-spec` intentionally leaves to the embedder: knowing which of
//! the four algorithms this crate supports a given digest names, and being
//! able to hash bytes into one.

use crate::error::{Error, Result};
use std::str::FromStr;

pub use oci_spec::image::Digest;

/// One of the digest algorithms this crate knows how to compute.
///
/// `oci_spec::image::DigestAlgorithm` only distinguishes the SHA family by
/// name and buckets everything else (including `blake3`) into `Other`; this
/// enum is the closed set we actually hash with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// SHA-256, the default algorithm used when none is specified.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
    /// BLAKE3.
    Blake3,
}

impl Algorithm {
    /// The algorithm used when a digest or reference doesn't name one.
    pub const DEFAULT: Algorithm = Algorithm::Sha256;

    /// The wire prefix for this algorithm (the part before the `:`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
            Algorithm::Blake3 => "blake3",
        }
    }

    /// Classifies a digest by the text of its algorithm prefix.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha384" => Ok(Algorithm::Sha384),
            "sha512" => Ok(Algorithm::Sha512),
            "blake3" => Ok(Algorithm::Blake3),
            other => Err(Error::parse(format!("unsupported digest algorithm: {other}"))),
        }
    }

    /// Hashes `data` with this algorithm and returns the resulting [`Digest`].
    pub fn digest(&self, data: &[u8]) -> Digest {
        let hex = match self {
            Algorithm::Sha256 => {
                use sha2::{Digest as _, Sha256};
                hex::encode(Sha256::digest(data))
            }
            Algorithm::Sha384 => {
                use sha2::{Digest as _, Sha384};
                hex::encode(Sha384::digest(data))
            }
            Algorithm::Sha512 => {
                use sha2::{Digest as _, Sha512};
                hex::encode(Sha512::digest(data))
            }
            Algorithm::Blake3 => blake3::hash(data).to_hex().to_string(),
        };
        Digest::from_str(&format!("{}:{hex}", self.as_str()))
            .expect("algorithm prefix + hex digest is always a well-formed Digest")
    }
}

/// Streaming hasher mirroring [`Algorithm::digest`] for content that should
/// not be buffered into memory whole (blob uploads/downloads, archive
/// packing).
pub enum Hasher {
    /// Incremental SHA-256 state.
    Sha256(Box<sha2::Sha256>),
    /// Incremental SHA-384 state.
    Sha384(Box<sha2::Sha384>),
    /// Incremental SHA-512 state.
    Sha512(Box<sha2::Sha512>),
    /// Incremental BLAKE3 state.
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    /// Starts a new streaming hash for `algorithm`.
    pub fn new(algorithm: Algorithm) -> Self {
        use sha2::Digest as _;
        match algorithm {
            Algorithm::Sha256 => Hasher::Sha256(Box::new(sha2::Sha256::new())),
            Algorithm::Sha384 => Hasher::Sha384(Box::new(sha2::Sha384::new())),
            Algorithm::Sha512 => Hasher::Sha512(Box::new(sha2::Sha512::new())),
            Algorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    /// Feeds more bytes into the running hash.
    pub fn update(&mut self, bytes: &[u8]) {
        use sha2::Digest as _;
        match self {
            Hasher::Sha256(h) => h.update(bytes),
            Hasher::Sha384(h) => h.update(bytes),
            Hasher::Sha512(h) => h.update(bytes),
            Hasher::Blake3(h) => {
                h.update(bytes);
            }
        }
    }

    /// Consumes the hasher, returning the final [`Digest`].
    pub fn finalize(self) -> Digest {
        use sha2::Digest as _;
        let (prefix, hex) = match self {
            Hasher::Sha256(h) => ("sha256", hex::encode(h.finalize())),
            Hasher::Sha384(h) => ("sha384", hex::encode(h.finalize())),
            Hasher::Sha512(h) => ("sha512", hex::encode(h.finalize())),
            Hasher::Blake3(h) => ("blake3", h.finalize().to_hex().to_string()),
        };
        Digest::from_str(&format!("{prefix}:{hex}"))
            .expect("algorithm prefix + hex digest is always a well-formed Digest")
    }
}

/// Returns the [`Algorithm`] a digest was computed with, defaulting to
/// [`Algorithm::DEFAULT`] only when callers explicitly ask for a default —
/// a [`Digest`] always names its own algorithm on the wire.
pub fn algorithm_of(digest: &Digest) -> Result<Algorithm> {
    Algorithm::parse(digest.algorithm().as_ref())
}

/// Verifies that `data` hashes to `expected` under `expected`'s own
/// algorithm. Returns [`Error::DigestMismatch`] on failure.
pub fn verify(expected: &Digest, data: &[u8]) -> Result<()> {
    let algorithm = algorithm_of(expected)?;
    let actual = algorithm.digest(data);
    if &actual == expected {
        Ok(())
    } else {
        Err(Error::DigestMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_json_matches_known_digest() {
        let d = Algorithm::Sha256.digest(b"{}");
        assert_eq!(
            d.to_string(),
            "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn every_algorithm_produces_a_digest_with_its_own_prefix() {
        for algorithm in [
            Algorithm::Sha256,
            Algorithm::Sha384,
            Algorithm::Sha512,
            Algorithm::Blake3,
        ] {
            let d = algorithm.digest(b"hello world");
            assert!(d.to_string().starts_with(&format!("{}:", algorithm.as_str())));
            assert!(algorithm_of(&d).is_ok());
        }
    }

    #[test]
    fn streaming_hasher_matches_one_shot() {
        let mut hasher = Hasher::new(Algorithm::Sha256);
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), Algorithm::Sha256.digest(b"hello world"));
    }

    #[test]
    fn verify_detects_mismatch() {
        let d = Algorithm::Sha256.digest(b"hello world");
        assert!(verify(&d, b"hello world").is_ok());
        assert!(matches!(
            verify(&d, b"goodbye world"),
            Err(Error::DigestMismatch { .. })
        ));
    }

    #[test]
    fn unsupported_algorithm_is_rejected() {
        assert!(Algorithm::parse("md5").is_err());
    }
}
