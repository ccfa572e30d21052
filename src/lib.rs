//! `ocidist` is a strongly-typed client for the OCI Distribution
//! Specification and the OCI Image Layout on-disk format.
//!
//! It provides:
//! - A [`reference`] model for parsing and formatting container and layout
//!   references, and a [`digest`] model for the four supported hashing
//!   algorithms.
//! - A [`model`] of the OCI JSON entities (descriptors, manifests, indices,
//!   configs, layers, annotations, referrers) with canonical serialization.
//! - Two transports — [`registry`] (HTTP) and [`layout`] (filesystem) —
//!   implementing the same [`store::Store`] contract, each pinning its own
//!   reference type as `Store::Ref`.
//! - A [`copy`] engine that streams artifacts between any two transports,
//!   recursing through indices and the referrers graph.
//!
//! # Example
//!
//! ```no_run
//! use ocidist::{auth::AuthProvider, reference::ContainerRef, registry::Registry};
//!
//! # async fn run() -> ocidist::error::Result<()> {
//! let client = Registry::new("docker.io", AuthProvider::None, Default::default())?;
//! let r: ContainerRef = "library/alpine:3.19".parse()?;
//! let manifest = ocidist::store::Store::get_manifest(&client, &r).await?;
//! println!("{}", manifest.config().digest());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod annotations;
pub mod auth;
pub mod codec;
pub mod copy;
pub mod digest;
pub mod error;
pub mod layout;
pub mod model;
pub mod reference;
pub mod registry;
pub mod store;

pub use error::{Error, Result};
