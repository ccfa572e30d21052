//! The cross-transport copy engine (§4.5): walks `index → manifests →
//! (config, layers)` plus the referrers graph, verifying nothing itself
//! (each [`Store`] already returns content keyed by the digest that names
//! it) but ordering every write so blobs land before the manifest that
//! references them, and manifests before the index that references them.

use crate::digest::Algorithm;
use crate::error::{Error, Result};
use crate::model::{index::is_index_media_type, manifest::is_manifest_media_type, Descriptor};
use crate::reference::RefOps;
use crate::store::{BlobSource, ContentKind, Store};
use futures::future::BoxFuture;

/// Which referrers/indices a [`copy`] call recurses into (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Follow `GetReferrers` on every copied manifest and copy each
    /// referrer too.
    pub include_referrers: bool,
    /// Recurse into nested indices rather than dropping them from the
    /// copied index.
    pub recursive: bool,
}

impl CopyOptions {
    /// `{include_referrers: false, recursive: false}` — copy exactly the
    /// content at `srcRef`, dropping any nested indices and skipping
    /// referrers.
    pub fn shallow() -> Self {
        Self {
            include_referrers: false,
            recursive: false,
        }
    }

    /// `{include_referrers: true, recursive: true}` — copy everything
    /// transitively reachable from `srcRef`.
    pub fn deep() -> Self {
        Self {
            include_referrers: true,
            recursive: true,
        }
    }
}

/// Copies the content named by `src_ref` on `source` to `tgt_ref` on
/// `target`.
///
/// Boxed rather than a plain `async fn` because index and referrers
/// recursion calls back into this same function — an `async fn` cannot
/// naturally call itself (its future's size would be unbounded); boxing the
/// return type erases it at each recursive call site (§5).
pub fn copy<'a, S, T>(
    source: &'a S,
    src_ref: &'a S::Ref,
    target: &'a T,
    tgt_ref: &'a T::Ref,
    options: &'a CopyOptions,
) -> BoxFuture<'a, Result<Descriptor>>
where
    S: Store + Sync,
    T: Store + Sync,
{
    Box::pin(async move {
        // Normalize refs for the effective target registry: whichever side
        // is unqualified adopts the other side's registry (§4.1, §4.5 step 2).
        let src_ref = match tgt_ref.registry_hint() {
            Some(registry) => src_ref.adopt_registry(registry),
            None => src_ref.clone(),
        };
        let tgt_ref = match src_ref.registry_hint() {
            Some(registry) => tgt_ref.adopt_registry(registry),
            None => tgt_ref.clone(),
        };
        let src_ref = &src_ref;
        let tgt_ref = &tgt_ref;

        let descriptor = source.probe_descriptor(src_ref).await?;
        let media_type = descriptor.media_type().as_ref().to_string();

        if is_manifest_media_type(&media_type) {
            copy_manifest(source, src_ref, target, tgt_ref, &descriptor, options).await
        } else if is_index_media_type(&media_type) {
            copy_index(source, src_ref, target, tgt_ref, options).await
        } else {
            Err(Error::invalid_state(format!(
                "cannot copy content of type {media_type} (neither a manifest nor an index)"
            )))
        }
    })
}

/// Copies a single blob named by `descriptor`'s digest, skipping the read
/// from `source` entirely when `target` already has it (§4.5 step 3's
/// "target may HEAD-skip without opening the source stream").
async fn copy_blob<S, T>(
    source: &S,
    src_ref: &S::Ref,
    target: &T,
    tgt_ref: &T::Ref,
    descriptor: &Descriptor,
) -> Result<()>
where
    S: Store + Sync,
    T: Store + Sync,
{
    let digest = descriptor.digest().clone();
    let dst_ref = tgt_ref.at_digest(digest.clone());

    if target.blob_exists(&dst_ref).await? {
        tracing::debug!(%digest, "blob copy skipped: already present on target");
        return Ok(());
    }

    let src_ref = src_ref.at_digest(digest);
    let bytes = source.get_blob(&src_ref).await?;
    target
        .push_blob(
            &dst_ref,
            bytes.len() as u64,
            BlobSource::Bytes(bytes),
            descriptor.annotations().clone(),
        )
        .await?;
    Ok(())
}

async fn copy_manifest<S, T>(
    source: &S,
    src_ref: &S::Ref,
    target: &T,
    tgt_ref: &T::Ref,
    descriptor: &Descriptor,
    options: &CopyOptions,
) -> Result<Descriptor>
where
    S: Store + Sync,
    T: Store + Sync,
{
    let manifest = source.get_manifest(src_ref).await?;

    let layers = source.collect_layers(src_ref, ContentKind::Manifest, true).await?;
    for layer in &layers {
        copy_blob(source, src_ref, target, tgt_ref, layer).await?;
    }
    copy_blob(source, src_ref, target, tgt_ref, manifest.config()).await?;

    let pushed = target.push_manifest(tgt_ref, manifest).await?;
    let pushed_descriptor = pushed
        .descriptor()
        .cloned()
        .unwrap_or_else(|| Descriptor::new(pushed.media_type(), pushed.to_json().len() as u64, descriptor.digest().clone()));

    if options.include_referrers {
        let referrers = source.get_referrers(&src_ref.at_digest(descriptor.digest().clone()), None).await?;
        for referrer in referrers.manifests() {
            let child_src = src_ref.at_digest(referrer.digest().clone());
            let child_tgt = tgt_ref.at_digest(referrer.digest().clone());
            copy(source, &child_src, target, &child_tgt, options).await?;
        }
    }

    Ok(pushed_descriptor)
}

async fn copy_index<S, T>(
    source: &S,
    src_ref: &S::Ref,
    target: &T,
    tgt_ref: &T::Ref,
    options: &CopyOptions,
) -> Result<Descriptor>
where
    S: Store + Sync,
    T: Store + Sync,
{
    let mut index = source.get_index(src_ref).await?;
    let children = index.manifests().to_vec();
    let mut kept = Vec::with_capacity(children.len());

    for child in children {
        let child_is_index = is_index_media_type(child.media_type().as_ref());
        if child_is_index && !options.recursive {
            tracing::debug!(digest = %child.digest(), "nested index dropped from non-recursive copy");
            continue;
        }

        let child_src = src_ref.at_digest(child.digest().clone());
        let child_tgt = tgt_ref.at_digest(child.digest().clone());

        if child_is_index {
            copy(source, &child_src, target, &child_tgt, options).await?;
        } else {
            let child_descriptor = source.probe_descriptor(&child_src).await?;
            copy_manifest(source, &child_src, target, &child_tgt, &child_descriptor, options).await?;
        }
        kept.push(child);
    }

    index.retain(|d| kept.iter().any(|k| k.digest() == d.digest()))?;
    let digest = Algorithm::Sha256.digest(index.to_json());
    let pushed = target.push_index(tgt_ref, index).await?;

    Ok(Descriptor::new(pushed.media_type(), pushed.to_json().len() as u64, digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::Annotations;
    use crate::model::{Config, Layer};
    use crate::reference::LayoutRef;

    async fn new_layout(dir: &std::path::Path) -> crate::layout::Layout {
        crate::layout::Layout::new(dir).await.unwrap()
    }

    #[tokio::test]
    async fn shallow_copy_moves_a_single_manifest_and_its_blobs() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let source = new_layout(src_dir.path()).await;
        let target = new_layout(dst_dir.path()).await;

        let src_ref: LayoutRef = format!("{}:v1", src_dir.path().display()).parse().unwrap();
        let layer = Layer::from_data(bytes::Bytes::from_static(b"layer contents"));
        source
            .push_artifact(&src_ref, None, Config::empty(), vec![layer], Annotations::new())
            .await
            .unwrap();

        let tgt_ref: LayoutRef = format!("{}:v1", dst_dir.path().display()).parse().unwrap();
        let result = copy(&source, &src_ref, &target, &tgt_ref, &CopyOptions::shallow())
            .await
            .unwrap();

        let copied = target.get_manifest(&tgt_ref).await.unwrap();
        assert_eq!(copied.layers().len(), 1);
        assert_eq!(result.digest(), copied.descriptor().unwrap().digest());

        let layer_digest = copied.layers()[0].digest().clone();
        let blob = target.get_blob(&tgt_ref.with_digest(layer_digest)).await.unwrap();
        assert_eq!(blob.as_ref(), b"layer contents");
    }

    #[tokio::test]
    async fn copy_skips_blob_already_present_on_target() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let source = new_layout(src_dir.path()).await;
        let target = new_layout(dst_dir.path()).await;

        let layer = Layer::from_data(bytes::Bytes::from_static(b"shared content"));
        let layer_digest = layer.descriptor().digest().clone();

        let src_ref: LayoutRef = format!("{}:v1", src_dir.path().display()).parse().unwrap();
        source
            .push_artifact(&src_ref, None, Config::empty(), vec![layer.clone()], Annotations::new())
            .await
            .unwrap();

        // Pre-seed the target with the same blob under a different tag, so
        // the copy's blob_exists check finds it without ever calling
        // get_blob on the source for this digest.
        let seed_ref: LayoutRef = format!("{}:seed", dst_dir.path().display()).parse().unwrap();
        target
            .push_blob(
                &seed_ref.with_digest(layer_digest.clone()),
                14,
                crate::store::BlobSource::Bytes(bytes::Bytes::from_static(b"shared content")),
                None,
            )
            .await
            .unwrap();

        let tgt_ref: LayoutRef = format!("{}:v1", dst_dir.path().display()).parse().unwrap();
        copy(&source, &src_ref, &target, &tgt_ref, &CopyOptions::shallow())
            .await
            .unwrap();

        let blob = target.get_blob(&tgt_ref.with_digest(layer_digest)).await.unwrap();
        assert_eq!(blob.as_ref(), b"shared content");
    }

    #[tokio::test]
    async fn non_recursive_index_copy_drops_nested_index() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let source = new_layout(src_dir.path()).await;
        let target = new_layout(dst_dir.path()).await;

        let manifest_a_ref: LayoutRef = format!("{}@sha256:00000000000000000000000000000000000000000000000000000000000000aa", src_dir.path().display())
            .parse()
            .unwrap();
        let manifest_a = source
            .build_artifact_manifest(&manifest_a_ref, None, Config::empty(), vec![], Annotations::new())
            .await
            .unwrap();
        let manifest_a_descriptor = source
            .push_manifest(&manifest_a_ref.with_digest(manifest_a.digest(Algorithm::Sha256)), manifest_a)
            .await
            .unwrap()
            .descriptor()
            .unwrap()
            .clone();

        let manifest_b_ref: LayoutRef = format!("{}@sha256:00000000000000000000000000000000000000000000000000000000000000bb", src_dir.path().display())
            .parse()
            .unwrap();
        let manifest_b = source
            .build_artifact_manifest(&manifest_b_ref, None, Config::empty(), vec![], Annotations::new())
            .await
            .unwrap();
        let manifest_b_descriptor = source
            .push_manifest(&manifest_b_ref.with_digest(manifest_b.digest(Algorithm::Sha256)), manifest_b)
            .await
            .unwrap()
            .descriptor()
            .unwrap()
            .clone();

        let nested_index = crate::model::Index::from_manifests(vec![manifest_b_descriptor.clone()]).unwrap();
        let nested_ref: LayoutRef = format!("{}@{}", src_dir.path().display(), nested_index.digest(Algorithm::Sha256))
            .parse()
            .unwrap();
        let nested_descriptor = {
            let pushed = source.push_index(&nested_ref, nested_index).await.unwrap();
            Descriptor::new(pushed.media_type(), pushed.to_json().len() as u64, nested_ref.digest().unwrap().clone())
        };

        let top_index = crate::model::Index::from_manifests(vec![manifest_a_descriptor, nested_descriptor]).unwrap();
        let top_ref: LayoutRef = format!("{}:top", src_dir.path().display()).parse().unwrap();
        source.push_index(&top_ref, top_index).await.unwrap();

        let tgt_ref: LayoutRef = format!("{}:top", dst_dir.path().display()).parse().unwrap();
        copy(&source, &top_ref, &target, &tgt_ref, &CopyOptions::shallow())
            .await
            .unwrap();

        let copied_index = target.get_index(&tgt_ref).await.unwrap();
        assert_eq!(copied_index.manifests().len(), 1);
        assert!(!is_index_media_type(copied_index.manifests()[0].media_type().as_ref()));
    }
}
