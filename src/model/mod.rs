//! Typed, immutable OCI JSON entities (§3).
//!
//! Descriptor and Platform are used as-is from [`oci_spec::image`] — that
//! crate already gives them the exact shape §3 describes, including the
//! `artifactType`/`subject` fields from the 1.1 spec and an inline `data`
//! field on [`oci_spec::image::Descriptor`]. What this module adds on top
//! is everything `oci-spec` leaves to the embedder: original-JSON-bytes
//! preservation for [`Manifest`] and [`Index`], the [`Config`]/[`Layer`]
//! inline-vs-path union, [`Referrers`] filtering, and platform matching.

pub mod config;
pub mod index;
pub mod layer;
pub mod manifest;
pub mod platform;
pub mod referrers;
pub mod tags;

pub use config::Config;
pub use index::Index;
pub use layer::{Layer, LayerSource};
pub use manifest::Manifest;
pub use referrers::Referrers;
pub use tags::{Repositories, Tags};

pub use oci_spec::image::{Descriptor, MediaType, Platform};
