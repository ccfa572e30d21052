//! The image/artifact config entity: a descriptor plus either inline data
//! or a promise to fetch the body by digest.

use crate::digest::Algorithm;
use bytes::Bytes;
use oci_spec::image::{Descriptor, MediaType};

/// The empty config's media type, used for artifacts with no meaningful
/// config payload (§3).
pub const EMPTY_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.empty.v1+json";

/// A config blob: its descriptor, plus the body when it is held inline
/// rather than fetched separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    descriptor: Descriptor,
    data: Option<Bytes>,
}

impl Config {
    /// Wraps a config body, computing its descriptor with `media_type`.
    pub fn from_data(media_type: MediaType, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let digest = Algorithm::Sha256.digest(&data);
        let descriptor = Descriptor::new(media_type, data.len() as u64, digest);
        Self {
            descriptor,
            data: Some(data),
        }
    }

    /// Wraps a config already known only by its descriptor — the body must
    /// be fetched from the store by digest.
    pub fn from_descriptor(descriptor: Descriptor) -> Self {
        Self {
            descriptor,
            data: None,
        }
    }

    /// The canonical empty config (§3, §8 scenario 3): media type
    /// `application/vnd.oci.empty.v1+json`, body `"{}"`.
    pub fn empty() -> Self {
        Self::from_data(
            MediaType::Other(EMPTY_CONFIG_MEDIA_TYPE.to_string()),
            Bytes::from_static(b"{}"),
        )
    }

    /// The descriptor (media type, digest, size) for this config.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// The inline body, when this config carries one.
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }
}
