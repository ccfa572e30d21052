//! The filesystem transport: an OCI Image Layout directory implementing the
//! same [`Store`] contract as [`crate::registry`] (§4.4).

use crate::digest::{Algorithm, Digest};
use crate::error::{Error, Result};
use crate::model::{Descriptor, Index, Layer, Manifest, Referrers, Repositories, Tags};
use crate::reference::LayoutRef;
use crate::store::{BlobSource, Store};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use oci_spec::image::{MediaType, ANNOTATION_REF_NAME};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const IMAGE_LAYOUT_VERSION: &str = "1.0.0";
const OCI_LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";

/// An OCI Image Layout directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Wraps `root`, creating it (and `oci-layout`/`blobs/`) if it doesn't
    /// already exist. Does not touch an existing `index.json`.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tokio::fs::create_dir_all(root.join("blobs")).await?;

        let layout_path = root.join(OCI_LAYOUT_FILE);
        if tokio::fs::try_exists(&layout_path).await? {
            let contents = tokio::fs::read_to_string(&layout_path).await?;
            let value: serde_json::Value = serde_json::from_str(&contents)?;
            if value["imageLayoutVersion"] != IMAGE_LAYOUT_VERSION {
                return Err(Error::invalid_state(format!(
                    "unsupported imageLayoutVersion: {}",
                    value["imageLayoutVersion"]
                )));
            }
        } else {
            let body = serde_json::json!({ "imageLayoutVersion": IMAGE_LAYOUT_VERSION });
            tokio::fs::write(&layout_path, serde_json::to_vec(&body)?).await?;
        }

        if !tokio::fs::try_exists(root.join(INDEX_FILE)).await? {
            let index = Index::from_manifests(vec![])?;
            tokio::fs::write(root.join(INDEX_FILE), index.to_json()).await?;
        }

        Ok(Self { root })
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join("blobs").join(digest.algorithm().as_ref()).join(digest.digest())
    }

    async fn read_index(&self) -> Result<Index> {
        let bytes = tokio::fs::read(self.root.join(INDEX_FILE)).await?;
        Index::from_json(bytes)
    }

    async fn write_index(&self, index: &Index) -> Result<()> {
        write_atomic(&self.root.join(INDEX_FILE), index.to_json()).await
    }

    /// Writes `bytes` to the blob path for `digest`, skipping if the blob
    /// already exists (§4.4.1: writing is idempotent).
    async fn write_blob(&self, digest: &Digest, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(digest);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        write_atomic(&path, bytes).await
    }

    /// Updates `index.json`, replacing any existing entry keyed by the
    /// `org.opencontainers.image.ref.name` annotation matching `descriptor`'s
    /// (or appending when none matches), then appending by digest when the
    /// ref carries no tag (§9: one entry per distinct (digest, tag) pair).
    async fn upsert_manifest(&self, r: &LayoutRef, mut descriptor: Descriptor) -> Result<()> {
        let mut annotations = descriptor.annotations().clone().unwrap_or_default();
        if r.selector().map(|s| !matches!(s, crate::reference::Selector::Digest(_))).unwrap_or(true) {
            annotations.insert(ANNOTATION_REF_NAME.to_string(), r.tag_or_digest());
        }
        descriptor.set_annotations(Some(annotations));

        let mut index = self.read_index().await?;
        let ref_name = descriptor.annotations().as_ref().and_then(|a| a.get(ANNOTATION_REF_NAME)).cloned();

        let mut manifests: Vec<Descriptor> = index
            .manifests()
            .iter()
            .filter(|existing| {
                let same_ref_name = ref_name.is_some()
                    && existing.annotations().as_ref().and_then(|a| a.get(ANNOTATION_REF_NAME)) == ref_name.as_ref();
                let same_digest = existing.digest() == descriptor.digest();
                !(same_ref_name || (ref_name.is_none() && same_digest))
            })
            .cloned()
            .collect();
        manifests.push(descriptor);

        index = Index::from_manifests(manifests)?;
        self.write_index(&index).await
    }

    async fn find_in_index(&self, r: &LayoutRef) -> Result<Descriptor> {
        let index = self.read_index().await?;
        let wanted = r.tag_or_digest();

        index
            .manifests()
            .iter()
            .find(|d| {
                if r.is_valid_digest() {
                    d.digest().to_string() == wanted
                } else {
                    d.annotations().as_ref().and_then(|a| a.get(ANNOTATION_REF_NAME)) == Some(&wanted)
                }
            })
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no entry for {wanted} in {}", self.root.display())))
    }

    async fn descriptor_for(&self, r: &LayoutRef) -> Result<Descriptor> {
        if let Some(digest) = r.digest() {
            if let Ok(found) = self.find_in_index(r).await {
                return Ok(found);
            }
            // No index entry (e.g. a digest pinned onto a ref with no
            // tag-name entry to begin with) — read the blob to learn size
            // and media type directly.
            let path = self.blob_path(digest);
            let bytes = tokio::fs::read(&path).await?;
            let value: serde_json::Value = serde_json::from_slice(&bytes)?;
            let media_type = value["mediaType"].as_str().unwrap_or("application/vnd.oci.image.manifest.v1+json");
            return Ok(Descriptor::new(MediaType::from(media_type), bytes.len() as u64, digest.clone()));
        }
        self.find_in_index(r).await
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("tmp-{}", Algorithm::Sha256.digest(bytes).digest()));
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl Store for Layout {
    type Ref = LayoutRef;

    async fn get_tags(&self, r: &Self::Ref) -> Result<Tags> {
        let _ = r;
        let index = self.read_index().await?;
        let tags = index
            .manifests()
            .iter()
            .filter_map(|d| d.annotations().as_ref().and_then(|a| a.get(ANNOTATION_REF_NAME)).cloned())
            .collect();
        Ok(Tags {
            name: self.root.display().to_string(),
            tags,
        })
    }

    async fn get_repositories(&self) -> Result<Repositories> {
        Ok(Repositories {
            repositories: vec![self.root.display().to_string()],
        })
    }

    async fn get_manifest(&self, r: &Self::Ref) -> Result<Manifest> {
        let descriptor = self.descriptor_for(r).await?;
        if crate::model::index::is_index_media_type(descriptor.media_type().as_ref()) {
            return Err(Error::invalid_state(
                "expected a manifest content type, got an index (probably multi-platform image)",
            ));
        }
        let bytes = tokio::fs::read(self.blob_path(descriptor.digest())).await?;
        Ok(Manifest::from_json(bytes)?.with_descriptor(descriptor))
    }

    async fn get_index(&self, r: &Self::Ref) -> Result<Index> {
        let descriptor = self.descriptor_for(r).await?;
        let bytes = tokio::fs::read(self.blob_path(descriptor.digest())).await?;
        Index::from_json(bytes)
    }

    async fn get_descriptor(&self, r: &Self::Ref) -> Result<Descriptor> {
        self.descriptor_for(r).await
    }

    async fn probe_descriptor(&self, r: &Self::Ref) -> Result<Descriptor> {
        self.descriptor_for(r).await
    }

    async fn blob_exists(&self, r: &Self::Ref) -> Result<bool> {
        let digest = r
            .digest()
            .ok_or_else(|| Error::invalid_state("checking blob existence requires a digest-selected ref"))?;
        Ok(tokio::fs::try_exists(self.blob_path(digest)).await?)
    }

    async fn get_blob(&self, r: &Self::Ref) -> Result<Bytes> {
        let digest = r
            .digest()
            .ok_or_else(|| Error::invalid_state("fetching a blob requires a digest-selected ref"))?;
        Ok(Bytes::from(tokio::fs::read(self.blob_path(digest)).await?))
    }

    async fn fetch_blob(&self, r: &Self::Ref) -> Result<BoxStream<'static, Result<Bytes>>> {
        let bytes = self.get_blob(r).await?;
        Ok(stream::once(async move { Ok(bytes) }).boxed())
    }

    async fn fetch_blob_to_path(&self, r: &Self::Ref, path: &Path) -> Result<()> {
        let digest = r
            .digest()
            .ok_or_else(|| Error::invalid_state("fetching a blob requires a digest-selected ref"))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(self.blob_path(digest), path).await?;
        Ok(())
    }

    async fn push_blob<'a>(
        &self,
        r: &Self::Ref,
        size: u64,
        source: BlobSource<'a>,
        annotations: Option<HashMap<String, String>>,
    ) -> Result<Layer> {
        let digest = r
            .digest()
            .cloned()
            .ok_or_else(|| Error::invalid_state("push_blob requires a digest-selected ref"))?;

        let bytes = match source {
            BlobSource::Bytes(bytes) => bytes,
            BlobSource::Path(path) => Bytes::from(tokio::fs::read(path).await?),
            BlobSource::Stream(mut stream) => {
                let mut buf = Vec::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Bytes::from(buf)
            }
        };

        self.write_blob(&digest, &bytes).await?;

        let mut descriptor = Descriptor::new(MediaType::Other("application/octet-stream".into()), size, digest.clone());
        descriptor.set_annotations(annotations);
        Ok(Layer::remote(descriptor, digest, size))
    }

    async fn push_manifest(&self, r: &Self::Ref, manifest: Manifest) -> Result<Manifest> {
        let digest = Algorithm::Sha256.digest(manifest.to_json());
        self.write_blob(&digest, manifest.to_json()).await?;

        let descriptor = Descriptor::new(manifest.media_type(), manifest.to_json().len() as u64, digest);
        self.upsert_manifest(r, descriptor.clone()).await?;
        Ok(manifest.with_descriptor(descriptor))
    }

    async fn push_index(&self, r: &Self::Ref, index: Index) -> Result<Index> {
        let digest = Algorithm::Sha256.digest(index.to_json());
        self.write_blob(&digest, index.to_json()).await?;

        let descriptor = Descriptor::new(index.media_type(), index.to_json().len() as u64, digest);
        self.upsert_manifest(r, descriptor).await?;
        Ok(index)
    }

    async fn get_referrers(&self, r: &Self::Ref, artifact_type: Option<&str>) -> Result<Referrers> {
        let descriptor = self.descriptor_for(r).await?;
        let index = self.read_index().await?;

        let mut referrers = Vec::new();
        for candidate in index.manifests() {
            if crate::model::index::is_index_media_type(candidate.media_type().as_ref()) {
                continue;
            }
            let bytes = match tokio::fs::read(self.blob_path(candidate.digest())).await {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            let Ok(manifest) = Manifest::from_json(bytes) else { continue };
            if manifest.subject().map(|s| s.digest()) == Some(descriptor.digest()) {
                referrers.push(candidate.clone());
            }
        }

        let referrers = Referrers::new(referrers);
        Ok(match artifact_type {
            Some(artifact_type) => referrers.filter_by_artifact_type(artifact_type),
            None => referrers,
        })
    }
}
