//! The abstract store contract (§4.2) implemented by [`crate::registry`]
//! and [`crate::layout`], and the single interface the [`crate::copy`]
//! engine is written against.

use crate::annotations::Annotations;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::model::{Config, Descriptor, Index, Layer, Manifest, Referrers, Repositories, Tags};
use crate::reference::RefOps;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use oci_spec::image::{ImageManifestBuilder, MediaType, ANNOTATION_TITLE};
use std::collections::HashMap;
use std::path::Path;

/// Where the bytes passed to [`Store::push_blob`] come from.
///
/// This is a pre-built source rather than a lazy factory closure: to keep
/// [`Store`] free of generic-over-closure methods (so the two concrete
/// transports stay simple to call generically), the "may skip opening the
/// source stream" laziness of §4.5 is implemented one level up, in the copy
/// engine, by calling [`Store::blob_exists`] before ever constructing a
/// [`BlobSource`].
pub enum BlobSource<'a> {
    /// The full content, already in memory.
    Bytes(Bytes),
    /// A streaming body of known total length.
    Stream(BoxStream<'a, Result<Bytes>>),
    /// A path to a local file to stream from.
    Path(&'a Path),
}

/// The cross-transport store contract (§4.2). A reference type is an
/// associated type rather than a trait parameter so that `Registry` and
/// `Layout` each pin it to their own reference kind ([`ContainerRef`] and
/// [`LayoutRef`] respectively) — the phantom-marker role §9 describes,
/// enforced here by the type system rather than a runtime tag.
///
/// [`ContainerRef`]: crate::reference::ContainerRef
/// [`LayoutRef`]: crate::reference::LayoutRef
#[async_trait]
pub trait Store {
    /// The reference type this store's operations are keyed by.
    type Ref: Send + Sync + RefOps;

    /// Lists the tags of the repository `r` names.
    async fn get_tags(&self, r: &Self::Ref) -> Result<Tags>;

    /// Lists every repository the store knows about (a layout reports a
    /// single synthetic entry for itself).
    async fn get_repositories(&self) -> Result<Repositories>;

    /// Fetches and parses the manifest `r` points to. Errors if `r` points
    /// to an index instead (§4.3.5).
    async fn get_manifest(&self, r: &Self::Ref) -> Result<Manifest>;

    /// Fetches and parses the index `r` points to.
    async fn get_index(&self, r: &Self::Ref) -> Result<Index>;

    /// Fetches the descriptor for `r`, fetching the body if that's the only
    /// way to learn its size.
    async fn get_descriptor(&self, r: &Self::Ref) -> Result<Descriptor>;

    /// Learns `r`'s descriptor (media type, digest, size) without fetching
    /// its body — a registry HEAD, or a layout `index.json` read.
    async fn probe_descriptor(&self, r: &Self::Ref) -> Result<Descriptor>;

    /// `true` if a blob named by `r`'s digest already exists in the store.
    /// Used by the copy engine to skip opening the source stream entirely
    /// (§4.5).
    async fn blob_exists(&self, r: &Self::Ref) -> Result<bool>;

    /// Fetches a blob's full body into memory.
    async fn get_blob(&self, r: &Self::Ref) -> Result<Bytes>;

    /// Opens a streaming read of a blob's body.
    async fn fetch_blob(&self, r: &Self::Ref) -> Result<BoxStream<'static, Result<Bytes>>>;

    /// Streams a blob's body to a local file at `path`.
    async fn fetch_blob_to_path(&self, r: &Self::Ref, path: &Path) -> Result<()>;

    /// Pushes a blob of `size` bytes from `source`, annotated with
    /// `annotations`. A preflight check (§4.3.3) skips the upload if the
    /// blob already exists.
    async fn push_blob<'a>(
        &self,
        r: &Self::Ref,
        size: u64,
        source: BlobSource<'a>,
        annotations: Option<HashMap<String, String>>,
    ) -> Result<Layer>;

    /// Pushes a manifest, returning a copy carrying its server-assigned
    /// descriptor.
    async fn push_manifest(&self, r: &Self::Ref, manifest: Manifest) -> Result<Manifest>;

    /// Pushes an index, returning a copy carrying its server-assigned
    /// descriptor where the transport provides one.
    async fn push_index(&self, r: &Self::Ref, index: Index) -> Result<Index>;

    /// Fetches the set of manifests whose `subject` points at `r`'s digest,
    /// optionally filtered to a single artifact type.
    async fn get_referrers(&self, r: &Self::Ref, artifact_type: Option<&str>) -> Result<Referrers>;

    /// Collects the layer descriptors reachable from `r`'s content (§4.3.6):
    /// a manifest's own layers, or the union of every directly referenced
    /// manifest's layers when `r` points at an index. A layer is kept
    /// unconditionally when it carries [`ANNOTATION_TITLE`]; otherwise it
    /// is kept only when `include_all` is true.
    async fn collect_layers(
        &self,
        r: &Self::Ref,
        content_kind: ContentKind,
        include_all: bool,
    ) -> Result<Vec<Descriptor>> {
        let layers: Vec<Descriptor> = match content_kind {
            ContentKind::Manifest => self.get_manifest(r).await?.layers().to_vec(),
            ContentKind::Index => {
                let index = self.get_index(r).await?;
                let mut all = Vec::new();
                for child in index.manifests() {
                    let child_ref = r.at_digest(child.digest().clone());
                    let manifest = self.get_manifest(&child_ref).await?;
                    all.extend(manifest.layers().iter().cloned());
                }
                all
            }
            ContentKind::Other => {
                return Err(Error::invalid_state(
                    "cannot collect layers from content that is neither a manifest nor an index",
                ));
            }
        };

        Ok(layers
            .into_iter()
            .filter(|l| {
                include_all
                    || l.annotations()
                        .as_ref()
                        .is_some_and(|a| a.contains_key(ANNOTATION_TITLE))
            })
            .collect())
    }

    /// Pushes `config` and each of `layers`'s blobs, merging `annotations`'
    /// per-file map into the matching layer (keyed by its
    /// [`ANNOTATION_TITLE`]) and its manifest/config maps into the built
    /// manifest, but does not push the manifest itself. Shared by
    /// [`push_artifact`](Store::push_artifact) and
    /// [`attach_artifact`](Store::attach_artifact), which differ only in
    /// where the built manifest ends up.
    async fn build_artifact_manifest(
        &self,
        r: &Self::Ref,
        artifact_type: Option<MediaType>,
        config: Config,
        layers: Vec<Layer>,
        annotations: Annotations,
    ) -> Result<Manifest> {
        let config_descriptor = config.descriptor().clone();
        if let Some(data) = config.data() {
            let config_ref = r.at_digest(config_descriptor.digest().clone());
            self.push_blob(
                &config_ref,
                config_descriptor.size(),
                BlobSource::Bytes(data.clone()),
                Some(annotations.config.clone()),
            )
            .await?;
        }

        let mut pushed_layers = Vec::with_capacity(layers.len());
        for layer in layers {
            let mut layer = layer;
            let title = layer
                .descriptor()
                .annotations()
                .as_ref()
                .and_then(|a| a.get(ANNOTATION_TITLE))
                .cloned();
            if let Some(extra) = title.as_ref().and_then(|t| annotations.files.get(t)) {
                let mut merged = layer.descriptor().annotations().clone().unwrap_or_default();
                merged.extend(extra.clone());
                layer = layer.with_annotations(merged);
            }

            let descriptor = layer.descriptor().clone();
            let layer_ref = r.at_digest(descriptor.digest().clone());
            match layer.source() {
                crate::model::layer::LayerSource::Inline(bytes) => {
                    self.push_blob(
                        &layer_ref,
                        descriptor.size(),
                        BlobSource::Bytes(bytes.clone()),
                        descriptor.annotations().clone(),
                    )
                    .await?;
                }
                crate::model::layer::LayerSource::File(path) => {
                    self.push_blob(
                        &layer_ref,
                        descriptor.size(),
                        BlobSource::Path(path),
                        descriptor.annotations().clone(),
                    )
                    .await?;
                }
                crate::model::layer::LayerSource::RemoteBlob { .. } => {}
            }
            pushed_layers.push(descriptor);
        }

        let mut builder = ImageManifestBuilder::default()
            .schema_version(2u32)
            .media_type(MediaType::ImageManifest)
            .config(config_descriptor)
            .layers(pushed_layers)
            .annotations(annotations.manifest.clone());
        if let Some(artifact_type) = artifact_type {
            builder = builder.artifact_type(artifact_type);
        }
        let inner = builder
            .build()
            .map_err(|e| Error::invalid_state(e.to_string()))?;

        Manifest::new(inner)?.stamp_created_if_absent()
    }

    /// Builds a manifest from `config`/`layers`/`annotations` and pushes it
    /// at `r` (§3: `PushArtifact`).
    async fn push_artifact(
        &self,
        r: &Self::Ref,
        artifact_type: Option<MediaType>,
        config: Config,
        layers: Vec<Layer>,
        annotations: Annotations,
    ) -> Result<Manifest> {
        let manifest = self
            .build_artifact_manifest(r, artifact_type, config, layers, annotations)
            .await?;
        self.push_manifest(r, manifest).await
    }

    /// Builds a manifest from `config`/`layers`/`annotations`, sets its
    /// `subject` to `subject`'s current descriptor, and pushes it at
    /// `subject`'s digest — a new, separate manifest rather than an
    /// overwrite of `subject` itself (§3: `AttachArtifact`).
    async fn attach_artifact(
        &self,
        subject: &Self::Ref,
        artifact_type: Option<MediaType>,
        config: Config,
        layers: Vec<Layer>,
        annotations: Annotations,
    ) -> Result<Manifest> {
        let subject_descriptor = self.probe_descriptor(subject).await?;
        let manifest = self
            .build_artifact_manifest(subject, artifact_type, config, layers, annotations)
            .await?
            .with_subject(subject_descriptor)?;

        let algorithm = subject.ref_algorithm()?;
        let digest = manifest.digest(algorithm);
        let target = subject.at_digest(digest);
        self.push_manifest(&target, manifest).await
    }

    /// Fetches `r`'s manifest and writes its config and every layer into
    /// `dest_dir`, unpacking any layer annotated with
    /// [`CONTENT_UNPACK_ANNOTATION`](crate::codec::CONTENT_UNPACK_ANNOTATION)
    /// rather than writing it verbatim (§3: `PullArtifact`, §6).
    async fn pull_artifact(&self, r: &Self::Ref, dest_dir: &Path) -> Result<Manifest> {
        let manifest = self.get_manifest(r).await?;

        let config_ref = r.at_digest(manifest.config().digest().clone());
        let config_bytes = self.get_blob(&config_ref).await?;
        tokio::fs::write(dest_dir.join("config.json"), &config_bytes).await?;

        for layer in manifest.layers() {
            let layer_ref = r.at_digest(layer.digest().clone());
            let annotations = layer.annotations();
            let title = annotations
                .as_ref()
                .and_then(|a| a.get(ANNOTATION_TITLE))
                .cloned()
                .unwrap_or_else(|| layer.digest().to_string());
            let unpack = annotations
                .as_ref()
                .and_then(|a| a.get(crate::codec::CONTENT_UNPACK_ANNOTATION))
                .map(|v| v == "true")
                .unwrap_or(false);

            if unpack {
                let bytes = self.get_blob(&layer_ref).await?;
                let codec = crate::codec::Codec::from_media_type(layer.media_type().as_ref())?;
                let expected_tar_digest = annotations
                    .as_ref()
                    .and_then(|a| a.get(crate::codec::CONTENT_DIGEST_ANNOTATION))
                    .map(|s| s.parse::<Digest>())
                    .transpose()?;
                crate::codec::unpack(codec, &bytes, dest_dir, expected_tar_digest.as_ref())?;
            } else {
                self.fetch_blob_to_path(&layer_ref, &dest_dir.join(&title)).await?;
            }
        }

        Ok(manifest)
    }
}

/// Classifies a fetched descriptor's media type for the dispatch of §4.3.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// A single-platform manifest.
    Manifest,
    /// A multi-platform (or fan-out) index.
    Index,
    /// Anything else — fatal per §4.5 "Other: fatal".
    Other,
}

impl ContentKind {
    /// Classifies a raw media type string.
    pub fn of(media_type: &str) -> Self {
        if crate::model::manifest::is_manifest_media_type(media_type) {
            ContentKind::Manifest
        } else if crate::model::index::is_index_media_type(media_type) {
            ContentKind::Index
        } else {
            ContentKind::Other
        }
    }
}

/// Resolves a [`Digest`]'s algorithm the way an unqualified reference does:
/// default to the registry's configured default algorithm when the digest
/// itself somehow doesn't parse as one of the four supported ones. In
/// practice every digest reaching this crate has already been validated by
/// [`crate::digest::algorithm_of`]; this exists for call sites that only
/// have a reference, not yet a digest.
pub fn digest_or_default(digest: Option<&Digest>) -> crate::digest::Algorithm {
    digest
        .and_then(|d| crate::digest::algorithm_of(d).ok())
        .unwrap_or(crate::digest::Algorithm::DEFAULT)
}
