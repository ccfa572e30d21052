//! Parsing and formatting of container and layout references.
//!
//! A [`ContainerRef`] names an artifact on a remote registry
//! (`[registry/][namespace/]repository[:tag][@digest]`); a [`LayoutRef`]
//! names one inside an on-disk [`OCI Image Layout`](crate::layout)
//! (`folder[:tag][@digest]`). Both are immutable; every mutator returns a
//! new value.

use crate::digest::{Algorithm, Digest};
use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

/// The registry used when a [`ContainerRef`] names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// The API host `docker.io` is rewritten to for actual HTTP requests.
pub const DOCKER_API_REGISTRY: &str = "registry-1.docker.io";

/// The namespace defaulted to when a repository on `docker.io` has none.
pub const DEFAULT_NAMESPACE: &str = "library";

/// The tag used when a [`ContainerRef`] names none.
pub const DEFAULT_TAG: &str = "latest";

static REGISTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.-]+(:[0-9]+)?$").unwrap());
static REPOSITORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]+(?:[._-][a-z0-9]+)*)(/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$").unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w[\w.-]{0,127}$").unwrap());
static LAYOUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)(?::([^:@]+))?(?:@(.+))?$").unwrap());

//--------------------------------------------------------------------------------------------------
// ContainerRef
//--------------------------------------------------------------------------------------------------

/// A reference to an artifact on a remote registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    registry: String,
    repository: String,
    selector: Selector,
    /// `true` if the input string named no registry — the unqualified side
    /// of a copy adopts the other side's registry (§4.1).
    unqualified: bool,
}

/// The tag-and/or-digest part of a [`ContainerRef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// A tag, with an optional pinned digest.
    Tag {
        /// The tag name.
        tag: String,
        /// A digest pinned alongside the tag (`repo:tag@digest`).
        digest: Option<Digest>,
    },
    /// A bare digest with no tag.
    Digest(Digest),
}

/// Operations the [`Store`](crate::store::Store) trait's default methods
/// need from a reference type without knowing whether it's a
/// [`ContainerRef`] or a [`LayoutRef`] (§9's phantom-marker role, extended
/// to the artifact-push/pull helpers).
pub trait RefOps: Sized + Clone {
    /// Returns a copy of this reference pinned to `digest`.
    fn at_digest(&self, digest: impl Into<Digest>) -> Self;

    /// The algorithm of this reference's digest, or the default algorithm
    /// when it has none.
    fn ref_algorithm(&self) -> Result<Algorithm>;

    /// The registry host this reference was explicitly qualified with, or
    /// `None` if it has no registry concept or was left unqualified.
    ///
    /// Used by the copy engine to decide which side of a copy, if either,
    /// should adopt the other's registry.
    fn registry_hint(&self) -> Option<&str> {
        None
    }

    /// Returns a copy of this reference with `registry` adopted, if this
    /// reference type has a registry concept to adopt one into. A no-op for
    /// reference types with none (e.g. layout references).
    fn adopt_registry(&self, registry: &str) -> Self {
        let _ = registry;
        self.clone()
    }
}

impl ContainerRef {
    /// The registry this reference was parsed or constructed with.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// The repository path (namespace and repository name combined, e.g.
    /// `library/alpine`).
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The tag/digest selector.
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// `true` if this reference named no registry at parse time.
    pub fn unqualified(&self) -> bool {
        self.unqualified
    }

    /// The host actually used for HTTP requests: `docker.io` is rewritten
    /// to [`DOCKER_API_REGISTRY`], every other registry is used as-is.
    pub fn api_registry(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DOCKER_API_REGISTRY
        } else {
            &self.registry
        }
    }

    /// The path segment identifying this ref on the manifest/tags
    /// endpoints: the digest when present, else the tag.
    pub fn tag_or_digest(&self) -> String {
        match &self.selector {
            Selector::Tag { digest: Some(d), .. } => d.to_string(),
            Selector::Tag { tag, .. } => tag.clone(),
            Selector::Digest(d) => d.to_string(),
        }
    }

    /// The digest of this reference, if it has one.
    pub fn digest(&self) -> Option<&Digest> {
        match &self.selector {
            Selector::Tag { digest, .. } => digest.as_ref(),
            Selector::Digest(d) => Some(d),
        }
    }

    /// The algorithm of this reference's digest, or [`Algorithm::DEFAULT`]
    /// when it has none.
    pub fn algorithm(&self) -> Result<Algorithm> {
        match self.digest() {
            Some(d) => Algorithm::parse(d.algorithm().as_ref()),
            None => Ok(Algorithm::DEFAULT),
        }
    }

    /// Returns a copy of this reference pinned to `digest`, replacing
    /// whatever selector it had.
    pub fn with_digest(&self, digest: impl Into<Digest>) -> Self {
        let digest = digest.into();
        let selector = match &self.selector {
            Selector::Tag { tag, .. } => Selector::Tag {
                tag: tag.clone(),
                digest: Some(digest),
            },
            Selector::Digest(_) => Selector::Digest(digest),
        };
        Self {
            selector,
            ..self.clone()
        }
    }

    /// Returns a copy of this reference with its registry replaced and
    /// `unqualified` cleared — used when the unqualified side of a copy
    /// adopts the other side's registry (§4.1).
    pub fn with_registry(&self, registry: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            unqualified: false,
            ..self.clone()
        }
    }
}

impl RefOps for ContainerRef {
    fn at_digest(&self, digest: impl Into<Digest>) -> Self {
        self.with_digest(digest)
    }

    fn ref_algorithm(&self) -> Result<Algorithm> {
        self.algorithm()
    }

    fn registry_hint(&self) -> Option<&str> {
        if self.unqualified {
            None
        } else {
            Some(&self.registry)
        }
    }

    fn adopt_registry(&self, registry: &str) -> Self {
        if self.unqualified {
            self.with_registry(registry)
        } else {
            self.clone()
        }
    }
}

impl FromStr for ContainerRef {
    type Err = Error;

    /// Parses `[registry/][namespace/]repository[:tag][@digest]`.
    ///
    /// Absent registry defaults to [`DEFAULT_REGISTRY`] (marking the
    /// reference `unqualified`); absent tag defaults to [`DEFAULT_TAG`];
    /// a repository with no namespace segment on `docker.io` is prefixed
    /// with [`DEFAULT_NAMESPACE`].
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s
            .strip_prefix("https://")
            .or_else(|| s.strip_prefix("http://"))
            .or_else(|| s.strip_prefix("oci://"))
            .unwrap_or(s);

        if s.is_empty() {
            return Err(Error::parse("input string is empty"));
        }

        if let Some(at_idx) = s.find('@') {
            let digest_part = &s[at_idx + 1..];
            if !digest_part.contains(':') {
                return Err(Error::parse(format!("invalid digest: {digest_part}")));
            }
            let pre = &s[..at_idx];
            let digest = digest_part
                .parse::<Digest>()
                .map_err(|e| Error::parse(format!("invalid digest: {e}")))?;

            let (registry, unqualified, remainder) = extract_registry(pre);
            let (repository, tag) = extract_repository_and_tag(remainder, &registry, unqualified)?;

            validate_registry(&registry)?;
            validate_repository(&repository)?;
            validate_tag(&tag)?;

            Ok(ContainerRef {
                registry,
                repository,
                selector: Selector::Tag {
                    tag,
                    digest: Some(digest),
                },
                unqualified,
            })
        } else {
            let (registry, unqualified, remainder) = extract_registry(s);
            let (repository, tag) = extract_repository_and_tag(remainder, &registry, unqualified)?;

            validate_registry(&registry)?;
            validate_repository(&repository)?;
            validate_tag(&tag)?;

            Ok(ContainerRef {
                registry,
                repository,
                selector: Selector::Tag { tag, digest: None },
                unqualified,
            })
        }
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        match &self.selector {
            Selector::Tag {
                tag,
                digest: Some(d),
            } => write!(f, ":{tag}@{d}"),
            Selector::Tag { tag, digest: None } => write!(f, ":{tag}"),
            Selector::Digest(d) => write!(f, "@{d}"),
        }
    }
}

fn validate_registry(registry: &str) -> Result<()> {
    if REGISTRY_RE.is_match(registry) {
        Ok(())
    } else {
        Err(Error::parse(format!("invalid registry: {registry}")))
    }
}

fn validate_repository(repository: &str) -> Result<()> {
    if REPOSITORY_RE.is_match(repository) {
        Ok(())
    } else {
        Err(Error::parse(format!("invalid repository: {repository}")))
    }
}

fn validate_tag(tag: &str) -> Result<()> {
    if TAG_RE.is_match(tag) {
        Ok(())
    } else {
        Err(Error::parse(format!("invalid tag: {tag}")))
    }
}

/// Splits a leading registry host off `reference`, returning
/// `(registry, unqualified, remainder)`. A leading segment is a registry
/// iff it contains a dot, a colon, or is literally `localhost`.
fn extract_registry(reference: &str) -> (String, bool, &str) {
    let segments: Vec<&str> = reference.splitn(2, '/').collect();
    if segments.len() > 1
        && (segments[0].contains('.') || segments[0].contains(':') || segments[0] == "localhost")
    {
        (segments[0].to_string(), false, segments[1])
    } else {
        (DEFAULT_REGISTRY.to_string(), true, reference)
    }
}

/// Splits `path` into `(repository, tag)`, defaulting the namespace when
/// the repository has none and the tag when absent.
///
/// The namespace default only ever fires when a registry was *explicitly*
/// given as `docker.io` (`!unqualified`) — it exists purely for path
/// construction against that one registry's API. A fully unqualified,
/// single-segment reference like `alpine` names no registry at all, so it
/// can't benefit from that rewrite and must be rejected instead: the
/// caller hasn't given enough to resolve a repository (§8 Scenario 2).
fn extract_repository_and_tag(path: &str, registry: &str, unqualified: bool) -> Result<(String, String)> {
    let namespace_default = |repo: &str| -> Result<String> {
        if repo.contains('/') {
            Ok(repo.to_string())
        } else if unqualified {
            // No registry was given at all, so there's nothing to rewrite
            // a bare repository name against.
            Err(Error::parse(
                "minimally required to include <namespace>/<repository>",
            ))
        } else if registry == DEFAULT_REGISTRY {
            Ok(format!("{DEFAULT_NAMESPACE}/{repo}"))
        } else {
            Ok(repo.to_string())
        }
    };

    if let Some(idx) = path.rfind(':') {
        let repo_part = &path[..idx];
        let tag_part = &path[idx + 1..];
        if repo_part.is_empty() {
            return Err(Error::parse("repository is empty"));
        }
        Ok((namespace_default(repo_part)?, tag_part.to_string()))
    } else {
        if path.is_empty() {
            return Err(Error::parse("repository is empty"));
        }
        Ok((namespace_default(path)?, DEFAULT_TAG.to_string()))
    }
}

//--------------------------------------------------------------------------------------------------
// LayoutRef
//--------------------------------------------------------------------------------------------------

/// A reference to an artifact inside an on-disk OCI Image Layout directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutRef {
    folder: PathBuf,
    selector: Option<Selector>,
}

impl LayoutRef {
    /// The layout directory this reference points into.
    ///
    /// The directory is not required to exist until the store is opened —
    /// parsing never touches the filesystem.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// The tag-or-digest selector, if the reference named one.
    pub fn selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }

    /// `true` if the selector (tag-or-digest slot) is itself a well-formed
    /// digest rather than a tag name.
    pub fn is_valid_digest(&self) -> bool {
        matches!(
            &self.selector,
            Some(Selector::Digest(_)) | Some(Selector::Tag { digest: Some(_), .. })
        )
    }

    /// The path segment used to key this ref in `index.json`: the digest
    /// when present, else the tag, else `latest`.
    pub fn tag_or_digest(&self) -> String {
        match &self.selector {
            Some(Selector::Tag { digest: Some(d), .. }) => d.to_string(),
            Some(Selector::Tag { tag, .. }) => tag.clone(),
            Some(Selector::Digest(d)) => d.to_string(),
            None => DEFAULT_TAG.to_string(),
        }
    }

    /// The digest of this reference, if it names one.
    pub fn digest(&self) -> Option<&Digest> {
        match &self.selector {
            Some(Selector::Tag { digest, .. }) => digest.as_ref(),
            Some(Selector::Digest(d)) => Some(d),
            None => None,
        }
    }

    /// The algorithm of this reference's digest, or [`Algorithm::DEFAULT`]
    /// when it has none.
    pub fn algorithm(&self) -> Result<Algorithm> {
        match self.digest() {
            Some(d) => Algorithm::parse(d.algorithm().as_ref()),
            None => Ok(Algorithm::DEFAULT),
        }
    }

    /// Returns a copy of this reference pinned to `digest`.
    pub fn with_digest(&self, digest: impl Into<Digest>) -> Self {
        Self {
            folder: self.folder.clone(),
            selector: Some(Selector::Digest(digest.into())),
        }
    }

    /// Returns a copy of this reference pinned to `tag`.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            folder: self.folder.clone(),
            selector: Some(Selector::Tag {
                tag: tag.into(),
                digest: None,
            }),
        }
    }
}

impl RefOps for LayoutRef {
    fn at_digest(&self, digest: impl Into<Digest>) -> Self {
        self.with_digest(digest)
    }

    fn ref_algorithm(&self) -> Result<Algorithm> {
        self.algorithm()
    }
}

impl FromStr for LayoutRef {
    type Err = Error;

    /// Parses `folder[:tag][@digest]`. If both a tag and a digest are
    /// captured, the digest wins.
    fn from_str(s: &str) -> Result<Self> {
        let caps = LAYOUT_RE
            .captures(s)
            .ok_or_else(|| Error::parse(format!("invalid layout reference: {s}")))?;

        let folder = caps
            .get(1)
            .map(|m| m.as_str())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| Error::parse("layout reference has no folder path"))?;
        let tag = caps.get(2).map(|m| m.as_str().to_string());
        let digest = caps
            .get(3)
            .map(|m| m.as_str().parse::<Digest>())
            .transpose()
            .map_err(|e| Error::parse(format!("invalid digest: {e}")))?;

        // Both tag and digest captured ⇒ digest wins (the tag is dropped).
        let selector = if let Some(d) = digest {
            Some(Selector::Digest(d))
        } else {
            tag.map(|tag| Selector::Tag { tag, digest: None })
        };

        Ok(LayoutRef {
            folder: PathBuf::from(folder),
            selector,
        })
    }
}

impl fmt::Display for LayoutRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.folder.display())?;
        match &self.selector {
            Some(Selector::Tag {
                tag,
                digest: Some(d),
            }) => write!(f, ":{tag}@{d}"),
            Some(Selector::Tag { tag, digest: None }) => write!(f, ":{tag}"),
            Some(Selector::Digest(d)) => write!(f, "@{d}"),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registry_and_tag() {
        let r: ContainerRef = "docker.io/library/alpine:3.19".parse().unwrap();
        assert_eq!(r.registry(), "docker.io");
        assert_eq!(r.repository(), "library/alpine");
        assert!(!r.unqualified());
        assert_eq!(r.api_registry(), "registry-1.docker.io");
        match r.selector() {
            Selector::Tag { tag, digest } => {
                assert_eq!(tag, "3.19");
                assert!(digest.is_none());
            }
            _ => panic!("expected Tag"),
        }
        assert_eq!(r.to_string(), "docker.io/library/alpine:3.19");
    }

    #[test]
    fn single_segment_repository_defaults_namespace_when_registry_is_explicit() {
        let r: ContainerRef = "docker.io/alpine:3.19".parse().unwrap();
        assert_eq!(r.registry(), DEFAULT_REGISTRY);
        assert_eq!(r.repository(), "library/alpine");
        assert!(!r.unqualified());
    }

    #[test]
    fn fully_unqualified_single_segment_repository_is_rejected() {
        let err = "alpine".parse::<ContainerRef>().unwrap_err();
        assert!(matches!(err, Error::ParseError(msg) if msg.contains("minimally required to include <namespace>/<repository>")));
    }

    #[test]
    fn default_registry_and_tag() {
        let r: ContainerRef = "myorg/myrepo".parse().unwrap();
        assert_eq!(r.registry(), DEFAULT_REGISTRY);
        assert!(r.unqualified());
        assert_eq!(r.repository(), "myorg/myrepo");
        match r.selector() {
            Selector::Tag { tag, .. } => assert_eq!(tag, DEFAULT_TAG),
            _ => panic!("expected Tag"),
        }
    }

    #[test]
    fn registry_with_port() {
        let r: ContainerRef = "registry.example.com:5000/myrepo:1.0".parse().unwrap();
        assert_eq!(r.registry(), "registry.example.com:5000");
        assert_eq!(r.repository(), "myrepo");
        assert_eq!(r.to_string(), "registry.example.com:5000/myrepo:1.0");
    }

    #[test]
    fn digest_and_tag() {
        let digest = "sha256:deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";
        let s = format!("registry.example.com/myrepo:mytag@{digest}");
        let r: ContainerRef = s.parse().unwrap();
        match r.selector() {
            Selector::Tag { tag, digest: Some(d) } => {
                assert_eq!(tag, "mytag");
                assert_eq!(d.to_string(), digest);
            }
            _ => panic!("expected Tag with digest"),
        }
        assert_eq!(r.to_string(), s);
    }

    #[test]
    fn digest_only_defaults_tag() {
        let digest = "sha256:deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";
        let s = format!("registry.example.com/myrepo@{digest}");
        let r: ContainerRef = s.parse().unwrap();
        match r.selector() {
            Selector::Tag { tag, digest: Some(d) } => {
                assert_eq!(tag, DEFAULT_TAG);
                assert_eq!(d.to_string(), digest);
            }
            _ => panic!("expected Tag with digest"),
        }
    }

    #[test]
    fn round_trip_format_then_parse() {
        let inputs = [
            "docker.io/library/alpine:3.19",
            "registry.example.com:5000/org/repo:v1",
            "192.168.1.1:5000/ubuntu:18.04",
        ];
        for input in inputs {
            let r: ContainerRef = input.parse().unwrap();
            let reparsed: ContainerRef = r.to_string().parse().unwrap();
            assert_eq!(r, reparsed);
        }
    }

    #[test]
    fn empty_input_is_a_parse_error() {
        let err = "".parse::<ContainerRef>().unwrap_err();
        assert!(err.to_string().contains("input string is empty"));
    }

    #[test]
    fn empty_repository_is_a_parse_error() {
        let err = "registry.example.com/:tag".parse::<ContainerRef>().unwrap_err();
        assert!(err.to_string().contains("repository is empty"));
    }

    #[test]
    fn invalid_registry_is_rejected() {
        let err = "inva!id-registry.com/library/alpine:3.19"
            .parse::<ContainerRef>()
            .unwrap_err();
        assert!(err.to_string().contains("invalid registry"));
    }

    #[test]
    fn invalid_repository_is_rejected() {
        let err = "docker.io/Library/alpine:3.19"
            .parse::<ContainerRef>()
            .unwrap_err();
        assert!(err.to_string().contains("invalid repository"));
    }

    #[test]
    fn tag_length_exceeding_128_is_rejected() {
        let long_tag = "a".repeat(129);
        let err = format!("docker.io/library/alpine:{long_tag}")
            .parse::<ContainerRef>()
            .unwrap_err();
        assert!(err.to_string().contains("invalid tag"));
    }

    #[test]
    fn with_digest_replaces_selector() {
        let r: ContainerRef = "docker.io/library/alpine:3.19".parse().unwrap();
        let digest = Algorithm::Sha256.digest(b"hello");
        let pinned = r.with_digest(digest.clone());
        match pinned.selector() {
            Selector::Tag { tag, digest: Some(d) } => {
                assert_eq!(tag, "3.19");
                assert_eq!(d, &digest);
            }
            _ => panic!("expected Tag with digest"),
        }
    }

    #[test]
    fn unqualified_ref_adopts_registry() {
        let r: ContainerRef = "myorg/myrepo:v1".parse().unwrap();
        assert!(r.unqualified());
        let qualified = r.with_registry("registry.example.com");
        assert!(!qualified.unqualified());
        assert_eq!(qualified.registry(), "registry.example.com");
    }

    #[test]
    fn registry_hint_is_none_for_unqualified_ref_and_some_for_qualified_ref() {
        let unqualified: ContainerRef = "myorg/myrepo:v1".parse().unwrap();
        assert_eq!(unqualified.registry_hint(), None);

        let qualified: ContainerRef = "registry.example.com/myorg/myrepo:v1".parse().unwrap();
        assert_eq!(qualified.registry_hint(), Some("registry.example.com"));
    }

    #[test]
    fn adopt_registry_rewrites_only_the_unqualified_side() {
        let unqualified: ContainerRef = "myorg/myrepo:v1".parse().unwrap();
        let adopted = unqualified.adopt_registry("registry.example.com");
        assert_eq!(adopted.registry(), "registry.example.com");
        assert!(!adopted.unqualified());

        let qualified: ContainerRef = "registry.example.com/myorg/myrepo:v1".parse().unwrap();
        let unchanged = qualified.adopt_registry("other.example.com");
        assert_eq!(unchanged.registry(), "registry.example.com");
    }

    #[test]
    fn layout_ref_registry_hint_and_adopt_registry_are_no_ops() {
        let r: LayoutRef = "/tmp/oci:v1".parse().unwrap();
        assert_eq!(r.registry_hint(), None);
        assert_eq!(r.adopt_registry("registry.example.com"), r);
    }

    #[test]
    fn layout_ref_parses_folder_tag_and_digest() {
        let digest = "sha256:deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";
        let r: LayoutRef = format!("/tmp/oci:mytag@{digest}").parse().unwrap();
        assert_eq!(r.folder(), Path::new("/tmp/oci"));
        assert!(r.is_valid_digest());
        assert_eq!(r.digest().unwrap().to_string(), digest);
    }

    #[test]
    fn layout_ref_tag_only() {
        let r: LayoutRef = "/tmp/oci:mytag".parse().unwrap();
        assert_eq!(r.folder(), Path::new("/tmp/oci"));
        assert!(!r.is_valid_digest());
        assert_eq!(r.tag_or_digest(), "mytag");
    }

    #[test]
    fn layout_ref_folder_only_defaults_to_latest() {
        let r: LayoutRef = "/tmp/oci".parse().unwrap();
        assert_eq!(r.tag_or_digest(), DEFAULT_TAG);
        assert!(r.selector().is_none());
    }
}
