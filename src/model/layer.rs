//! The layer entity: a descriptor carrying inline data, a local file, or a
//! pointer to a blob already known to live on a remote store.

use crate::digest::{Algorithm, Digest};
use crate::error::{Error, Result};
use bytes::Bytes;
use oci_spec::image::{Descriptor, MediaType, ANNOTATION_TITLE};
use std::path::{Path, PathBuf};

/// Where a [`Layer`]'s bytes actually live (§9 design note: "Layer as
/// union"). Constructing a [`Layer`] always picks exactly one of these —
/// there is no variant that carries both inline data and a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSource {
    /// The layer's full content, held in memory.
    Inline(Bytes),
    /// A path to the layer's content on the local filesystem.
    File(PathBuf),
    /// A blob already known to exist on a remote store, identified by
    /// digest and size — no local bytes are held.
    RemoteBlob {
        /// The blob's digest.
        digest: Digest,
        /// The blob's size in bytes.
        size: u64,
    },
}

/// A layer: a descriptor that will appear in `manifest.layers`, together
/// with where its content actually comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    descriptor: Descriptor,
    source: LayerSource,
}

/// The default media type assigned to a layer built from raw bytes with no
/// more specific codec in play.
pub const DEFAULT_LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";

impl Layer {
    /// Builds a layer from in-memory bytes, using the default layer media
    /// type and a freshly computed digest.
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let digest = Algorithm::Sha256.digest(&data);
        let descriptor = Descriptor::new(
            MediaType::Other(DEFAULT_LAYER_MEDIA_TYPE.to_string()),
            data.len() as u64,
            digest,
        );
        Self {
            descriptor,
            source: LayerSource::Inline(data),
        }
    }

    /// Builds a layer from a local file, stamping [`ANNOTATION_TITLE`] with
    /// the file's name and probing its content type by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        let title = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::invalid_state(format!("path has no file name: {path:?}")))?;

        let data = std::fs::read(path)?;
        let digest = Algorithm::Sha256.digest(&data);
        let media_type = content_type(path);

        let mut annotations = std::collections::HashMap::new();
        annotations.insert(ANNOTATION_TITLE.to_string(), title.to_string());

        let mut descriptor = Descriptor::new(media_type, metadata.len(), digest);
        descriptor.set_annotations(Some(annotations));

        Ok(Self {
            descriptor,
            source: LayerSource::File(path.to_path_buf()),
        })
    }

    /// Builds a layer descriptor for a blob already known to exist on a
    /// remote store — used by the copy engine when it skips re-streaming a
    /// blob the target already has (§4.5).
    pub fn remote(descriptor: Descriptor, digest: Digest, size: u64) -> Self {
        Self {
            descriptor,
            source: LayerSource::RemoteBlob { digest, size },
        }
    }

    /// Builds a layer from already-packed archive bytes (§4.6): the digest
    /// is computed over the archive bytes themselves (not the uncompressed
    /// tar stream), [`ANNOTATION_TITLE`] is stamped with `title`, and the
    /// uncompressed tar digest — when the codec produced one — is recorded
    /// under `io.deis.oras.content.digest` so a later pull-with-unpack can
    /// verify it (§6).
    pub fn from_archive(
        media_type: MediaType,
        bytes: impl Into<Bytes>,
        title: &str,
        uncompressed_tar_digest: Option<Digest>,
    ) -> Self {
        let bytes = bytes.into();
        let digest = Algorithm::Sha256.digest(&bytes);

        let mut annotations = std::collections::HashMap::new();
        annotations.insert(ANNOTATION_TITLE.to_string(), title.to_string());
        if let Some(tar_digest) = uncompressed_tar_digest {
            annotations.insert(
                crate::codec::CONTENT_DIGEST_ANNOTATION.to_string(),
                tar_digest.to_string(),
            );
        }

        let mut descriptor = Descriptor::new(media_type, bytes.len() as u64, digest);
        descriptor.set_annotations(Some(annotations));

        Self {
            descriptor,
            source: LayerSource::Inline(bytes),
        }
    }

    /// Returns a copy of this layer with its descriptor's annotations
    /// replaced by `annotations`.
    pub fn with_annotations(mut self, annotations: std::collections::HashMap<String, String>) -> Self {
        self.descriptor.set_annotations(Some(annotations));
        self
    }

    /// This layer's descriptor.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Where this layer's bytes come from.
    pub fn source(&self) -> &LayerSource {
        &self.source
    }
}

/// Probes a layer media type from a file's extension. Recognizes the
/// archive codecs in §4.6; anything else falls back to the plain tar
/// layer media type.
pub fn content_type(path: &Path) -> MediaType {
    let name = path.to_string_lossy();
    let mt = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        "application/vnd.oci.image.layer.v1.tar+gzip"
    } else if name.ends_with(".tar.zst") {
        "application/vnd.oci.image.layer.v1.tar+zstd"
    } else if name.ends_with(".zip") {
        "application/vnd.oras.archive.v1+zip"
    } else if name.ends_with(".tar") {
        "application/vnd.oci.image.layer.v1.tar"
    } else {
        DEFAULT_LAYER_MEDIA_TYPE
    };
    MediaType::Other(mt.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_data_uses_default_media_type_and_computed_digest() {
        let layer = Layer::from_data(Bytes::from_static(b"hello"));
        assert_eq!(
            layer.descriptor().media_type(),
            &MediaType::Other(DEFAULT_LAYER_MEDIA_TYPE.to_string())
        );
        assert_eq!(layer.descriptor().digest(), &Algorithm::Sha256.digest(b"hello"));
        assert!(matches!(layer.source(), LayerSource::Inline(_)));
    }

    #[test]
    fn from_file_stamps_title_annotation_and_probes_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rootfs.tar.gz");
        std::fs::write(&path, b"fake archive contents").unwrap();

        let layer = Layer::from_file(&path).unwrap();
        assert_eq!(
            layer
                .descriptor()
                .annotations()
                .as_ref()
                .and_then(|a| a.get(ANNOTATION_TITLE)),
            Some(&"rootfs.tar.gz".to_string())
        );
        assert_eq!(
            layer.descriptor().media_type(),
            &MediaType::Other("application/vnd.oci.image.layer.v1.tar+gzip".to_string())
        );
        assert!(matches!(layer.source(), LayerSource::File(_)));
    }

    #[test]
    fn content_type_recognizes_all_registered_codecs() {
        assert_eq!(
            content_type(Path::new("a.tar")),
            MediaType::Other("application/vnd.oci.image.layer.v1.tar".into())
        );
        assert_eq!(
            content_type(Path::new("a.tar.gz")),
            MediaType::Other("application/vnd.oci.image.layer.v1.tar+gzip".into())
        );
        assert_eq!(
            content_type(Path::new("a.tar.zst")),
            MediaType::Other("application/vnd.oci.image.layer.v1.tar+zstd".into())
        );
        assert_eq!(
            content_type(Path::new("a.zip")),
            MediaType::Other("application/vnd.oras.archive.v1+zip".into())
        );
    }
}
