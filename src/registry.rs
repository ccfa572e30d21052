//! The HTTP registry transport (§4.3): URL construction, the Bearer
//! challenge/response flow, the two-stage blob upload protocol, and
//! content-type dispatch, built on `reqwest` with the `reqwest-middleware`
//! and `reqwest-retry` stack for transient-failure retries.

use crate::auth::{AuthProvider, Challenge, SharedAuthProvider};
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::model::{Descriptor, Index, Layer, Manifest, MediaType, Referrers, Repositories, Tags};
use crate::reference::{ContainerRef, DEFAULT_REGISTRY, DOCKER_API_REGISTRY};
use crate::store::{BlobSource, Store};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// The media type assumed for a blob pushed with no more specific type of
/// its own (registry blobs below the manifest/config/layer level carry no
/// media type on the wire).
const OCTET_STREAM: &str = "application/octet-stream";

const MANIFEST_MEDIA_TYPES: &str = "application/vnd.oci.image.manifest.v1+json,application/vnd.docker.distribution.manifest.v2+json";
const INDEX_MEDIA_TYPES: &str = "application/vnd.oci.image.index.v1+json,application/vnd.docker.distribution.manifest.list.v2+json";
const ANY_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json,application/vnd.docker.distribution.manifest.v2+json,application/vnd.oci.image.index.v1+json,application/vnd.docker.distribution.manifest.list.v2+json";

/// Connection options consumed when building a [`Registry`]'s underlying
/// `reqwest::Client` (§4.9, §6).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Use `http://` instead of `https://` for every request.
    pub insecure: bool,
    /// Disable TLS certificate chain and hostname verification.
    pub skip_tls_verify: bool,
    /// Connect timeout.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            insecure: false,
            skip_tls_verify: false,
            timeout: Duration::from_secs(60),
        }
    }
}

/// A client for the OCI Distribution Specification HTTP API (§4.3). Cheap to
/// clone — the underlying `reqwest` client and the shared auth provider are
/// both `Arc`-backed, so one instance can be shared across tasks (§5).
#[derive(Debug, Clone)]
pub struct Registry {
    client: ClientWithMiddleware,
    host: String,
    scheme: &'static str,
    auth: SharedAuthProvider,
}

impl Registry {
    /// Builds a client targeting `host` (e.g. `docker.io`, `ghcr.io`,
    /// `localhost:5000`), authenticating with `auth`.
    ///
    /// Redirects are never auto-followed: a 3xx on a blob GET is handled by
    /// [`Store::fetch_blob`]/[`Store::get_blob`] itself, which follows
    /// exactly one hop without forwarding `Authorization` (§4.3.2, §9).
    pub fn new(host: impl Into<String>, auth: AuthProvider, config: ClientConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none());
        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            host: host.into(),
            scheme: if config.insecure { "http" } else { "https" },
            auth: SharedAuthProvider::new(auth),
        })
    }

    fn api_host(&self) -> String {
        api_host_for(&self.host)
    }

    fn base_url(&self, r: &ContainerRef) -> String {
        format!("{}://{}/v2/{}", self.scheme, r.api_registry(), r.repository())
    }

    fn manifest_url(&self, r: &ContainerRef) -> String {
        format!("{}/manifests/{}", self.base_url(r), r.tag_or_digest())
    }

    /// Sends a request built fresh by `build`, applying the current auth
    /// provider, and — on a 401/403 — parses the `WWW-Authenticate`
    /// challenge, refreshes the shared provider, and retries exactly once
    /// with the new credentials (§4.3.2). `build` must be safe to call
    /// twice (it is only ever handed bodies cheap to clone).
    async fn execute(
        &self,
        build: impl Fn(&ClientWithMiddleware, &AuthProvider) -> RequestBuilder,
    ) -> Result<Response> {
        let provider = self.auth.get().await;
        tracing::debug!("issuing registry request");
        let response = build(&self.client, &provider).send().await?;

        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            let header = response
                .headers()
                .get(reqwest::header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| Error::AuthChallenge("challenge response carried no WWW-Authenticate header".into()))?;
            let challenge = Challenge::parse(&header)?;

            tracing::info!(realm = %challenge.realm, "refreshing bearer token after auth challenge");
            let refreshed = provider.fetch_bearer_token(&self.client, &challenge).await?;
            self.auth.set(refreshed.clone()).await;

            let retried = build(&self.client, &refreshed).send().await?;
            if matches!(retried.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                return Err(Error::AuthChallenge(format!(
                    "request still unauthorized after token refresh ({})",
                    retried.status()
                )));
            }
            return Ok(retried);
        }

        Ok(response)
    }

    /// Follows a single 301/302/307 redirect on a blob GET, omitting
    /// `Authorization` on the hop (§4.3.2, §9). A second redirect is fatal.
    async fn follow_redirect_once(&self, response: Response) -> Result<Response> {
        if response.status().is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Error::Transport("redirect response carried no Location header".into()))?
                .to_string();

            tracing::debug!(%location, "following blob redirect without credentials");
            let redirected = self.client.get(&location).send().await?;
            if redirected.status().is_redirection() {
                return Err(Error::Transport("blob redirect chain exceeded one hop".into()));
            }
            Ok(redirected)
        } else {
            Ok(response)
        }
    }

    /// Resolves a possibly relative blob-upload `Location` against `r`'s
    /// API host (§4.3.3).
    fn resolve_location(&self, r: &ContainerRef, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            let stripped = location.strip_prefix('/').unwrap_or(location);
            format!("{}://{}/{}", self.scheme, r.api_registry(), stripped)
        }
    }

    async fn fetch_blob_response(&self, r: &ContainerRef) -> Result<Response> {
        let digest = r
            .digest()
            .ok_or_else(|| Error::invalid_state("fetching a blob requires a digest-selected ref"))?;
        let url = format!("{}/blobs/{}", self.base_url(r), digest);

        let response = self.execute(|client, auth| auth.apply(client.get(&url))).await?;
        let response = self.follow_redirect_once(response).await?;
        check_status(response).await
    }
}

/// Rewrites `docker.io` to the API host Docker's registry actually serves
/// from (§4.1); every other registry is used as-is.
fn api_host_for(host: &str) -> String {
    if host == DEFAULT_REGISTRY {
        DOCKER_API_REGISTRY.to_string()
    } else {
        host.to_string()
    }
}

/// Turns a non-2xx response into the matching [`Error`] variant, consuming
/// the response body as the error's message when present.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        404 => Err(Error::not_found(body)),
        401 | 403 => Err(Error::AuthChallenge(body)),
        400..=499 => Err(Error::Conflict {
            status: status.as_u16(),
            message: body,
        }),
        _ => Err(Error::Transport(format!("{status}: {body}"))),
    }
}

fn docker_content_digest(response: &Response) -> Option<Digest> {
    response
        .headers()
        .get("Docker-Content-Digest")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<Digest>().ok())
}

/// `Response::content_length` reads the body's size hint, which is always
/// zero for a HEAD response since no body is ever transferred. The actual
/// size has to come from the `Content-Length` header itself.
fn content_length_header(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

fn content_type_of(response: &Response) -> Result<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| Error::invalid_state("response carried no Content-Type header"))
}

/// Materializes a [`BlobSource`] into owned bytes. Blob bodies are
/// buffered in memory rather than streamed end-to-end — a deliberate
/// simplification (see `DESIGN.md`) that keeps the auth-challenge retry of
/// §4.3.2 able to resend the exact same body.
async fn read_source(source: BlobSource<'_>) -> Result<Bytes> {
    match source {
        BlobSource::Bytes(bytes) => Ok(bytes),
        BlobSource::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        BlobSource::Stream(mut stream) => {
            let mut buf = Vec::new();
            while let Some(chunk) = stream.next().await {
                buf.extend_from_slice(&chunk?);
            }
            Ok(Bytes::from(buf))
        }
    }
}

#[async_trait]
impl Store for Registry {
    type Ref = ContainerRef;

    async fn get_tags(&self, r: &Self::Ref) -> Result<Tags> {
        let url = format!("{}/tags/list", self.base_url(r));
        let response = self.execute(|client, auth| auth.apply(client.get(&url))).await?;
        let response = check_status(response).await?;
        Ok(response.json::<Tags>().await?)
    }

    async fn get_repositories(&self) -> Result<Repositories> {
        let url = format!("{}://{}/v2/_catalog", self.scheme, self.api_host());
        let response = self.execute(|client, auth| auth.apply(client.get(&url))).await?;
        let response = check_status(response).await?;
        Ok(response.json::<Repositories>().await?)
    }

    async fn get_manifest(&self, r: &Self::Ref) -> Result<Manifest> {
        let url = self.manifest_url(r);
        let response = self
            .execute(|client, auth| auth.apply(client.get(&url)).header(reqwest::header::ACCEPT, MANIFEST_MEDIA_TYPES))
            .await?;
        let response = check_status(response).await?;

        let content_type = content_type_of(&response)?;
        let digest = docker_content_digest(&response);
        let size = response.content_length();
        let bytes = response.bytes().await?;

        let manifest = crate::model::manifest::parse_manifest(bytes, &content_type)?;
        Ok(match (digest, size) {
            (Some(digest), Some(size)) => {
                manifest.with_descriptor(Descriptor::new(MediaType::from(content_type.as_str()), size, digest))
            }
            _ => manifest,
        })
    }

    async fn get_index(&self, r: &Self::Ref) -> Result<Index> {
        let url = self.manifest_url(r);
        let response = self
            .execute(|client, auth| auth.apply(client.get(&url)).header(reqwest::header::ACCEPT, INDEX_MEDIA_TYPES))
            .await?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await?;
        Index::from_json(bytes)
    }

    async fn get_descriptor(&self, r: &Self::Ref) -> Result<Descriptor> {
        self.probe_descriptor(r).await
    }

    async fn probe_descriptor(&self, r: &Self::Ref) -> Result<Descriptor> {
        let url = self.manifest_url(r);
        let response = self
            .execute(|client, auth| {
                auth.apply(client.head(&url))
                    .header(reqwest::header::ACCEPT, ANY_MANIFEST_MEDIA_TYPE)
            })
            .await?;
        let response = check_status(response).await?;

        let content_type = content_type_of(&response)?;
        let digest = docker_content_digest(&response)
            .ok_or_else(|| Error::invalid_state("manifest HEAD response carried no Docker-Content-Digest"))?;
        let size = content_length_header(&response)
            .ok_or_else(|| Error::invalid_state("manifest HEAD response carried no Content-Length"))?;

        Ok(Descriptor::new(MediaType::from(content_type.as_str()), size, digest))
    }

    async fn blob_exists(&self, r: &Self::Ref) -> Result<bool> {
        let digest = r
            .digest()
            .ok_or_else(|| Error::invalid_state("checking blob existence requires a digest-selected ref"))?;
        let url = format!("{}/blobs/{}", self.base_url(r), digest);
        let response = self.execute(|client, auth| auth.apply(client.head(&url))).await?;
        Ok(response.status().is_success())
    }

    async fn get_blob(&self, r: &Self::Ref) -> Result<Bytes> {
        let response = self.fetch_blob_response(r).await?;
        Ok(response.bytes().await?)
    }

    async fn fetch_blob(&self, r: &Self::Ref) -> Result<BoxStream<'static, Result<Bytes>>> {
        let response = self.fetch_blob_response(r).await?;
        Ok(response.bytes_stream().map(|item| item.map_err(Error::from)).boxed())
    }

    async fn fetch_blob_to_path(&self, r: &Self::Ref, path: &Path) -> Result<()> {
        let response = self.fetch_blob_response(r).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
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

        if self.blob_exists(r).await? {
            tracing::debug!(%digest, "blob push skipped: already present");
            let mut descriptor = Descriptor::new(MediaType::Other(OCTET_STREAM.into()), size, digest.clone());
            descriptor.set_annotations(annotations);
            return Ok(Layer::remote(descriptor, digest, size));
        }

        let bytes = read_source(source).await?;
        let base = self.base_url(r);
        let monolithic_url = format!("{base}/blobs/uploads/?digest={digest}");

        let response = self
            .execute(|client, auth| {
                auth.apply(client.post(&monolithic_url))
                    .header(reqwest::header::CONTENT_TYPE, OCTET_STREAM)
                    .body(bytes.clone())
            })
            .await?;

        let response = if response.status() == StatusCode::ACCEPTED {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Error::Transport("blob upload initiation returned 202 with no Location".into()))?
                .to_string();
            let upload_url = self.resolve_location(r, &location);
            let separator = if upload_url.contains('?') { '&' } else { '?' };
            let put_url = format!("{upload_url}{separator}digest={digest}");

            self.execute(|client, auth| {
                auth.apply(client.put(&put_url))
                    .header(reqwest::header::CONTENT_TYPE, OCTET_STREAM)
                    .body(bytes.clone())
            })
            .await?
        } else {
            response
        };

        let response = check_status(response).await?;
        if response.status() != StatusCode::CREATED {
            return Err(Error::Transport(format!("blob upload finished with unexpected status {}", response.status())));
        }

        let mut descriptor = Descriptor::new(MediaType::Other(OCTET_STREAM.into()), bytes.len() as u64, digest.clone());
        descriptor.set_annotations(annotations);
        Ok(Layer::remote(descriptor, digest, bytes.len() as u64))
    }

    async fn push_manifest(&self, r: &Self::Ref, manifest: Manifest) -> Result<Manifest> {
        let url = self.manifest_url(r);
        let media_type = manifest.media_type().as_ref().to_string();
        let body = Bytes::copy_from_slice(manifest.to_json());
        let has_subject = manifest.subject().is_some();

        let response = self
            .execute(|client, auth| {
                auth.apply(client.put(&url))
                    .header(reqwest::header::CONTENT_TYPE, media_type.clone())
                    .body(body.clone())
            })
            .await?;
        let response = check_status(response).await?;

        if has_subject && response.headers().get("OCI-Subject").is_none() {
            return Err(Error::invalid_state(
                "manifest carries a subject but the registry response had no OCI-Subject header (legacy subject-fallback is not supported)",
            ));
        }

        let digest = docker_content_digest(&response)
            .ok_or_else(|| Error::invalid_state("manifest push response carried no Docker-Content-Digest"))?;
        let descriptor = Descriptor::new(manifest.media_type(), body.len() as u64, digest);
        Ok(manifest.with_descriptor(descriptor))
    }

    async fn push_index(&self, r: &Self::Ref, index: Index) -> Result<Index> {
        let url = self.manifest_url(r);
        let media_type = index.media_type().as_ref().to_string();
        let body = Bytes::copy_from_slice(index.to_json());

        let response = self
            .execute(|client, auth| {
                auth.apply(client.put(&url))
                    .header(reqwest::header::CONTENT_TYPE, media_type.clone())
                    .body(body.clone())
            })
            .await?;
        check_status(response).await?;

        Ok(index)
    }

    async fn get_referrers(&self, r: &Self::Ref, artifact_type: Option<&str>) -> Result<Referrers> {
        let digest = r
            .digest()
            .cloned()
            .ok_or_else(|| Error::invalid_state("get_referrers requires a digest-selected ref"))?;
        let url = format!("{}/referrers/{}", self.base_url(r), digest);

        let response = self
            .execute(|client, auth| {
                let mut builder = auth.apply(client.get(&url));
                if let Some(artifact_type) = artifact_type {
                    builder = builder.query(&[("artifactType", artifact_type)]);
                }
                builder
            })
            .await?;
        let response = check_status(response).await?;

        let bytes = response.bytes().await?;
        let index = Index::from_json(bytes)?;
        let referrers = Referrers::new(index.manifests().to_vec());
        Ok(match artifact_type {
            Some(artifact_type) => referrers.filter_by_artifact_type(artifact_type),
            None => referrers,
        })
    }
}
