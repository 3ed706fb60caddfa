//! Cluster collaborators consumed by the shp watch engine
//!
//! The engine never talks to the cluster directly. It goes through the two interfaces
//! defined here:
//!
//! - [`ResourceApi`] to subscribe to, list and get resources of one kind
//! - [`LogApi`] to read container logs, either followed or as a one-shot snapshot
//!
//! [`KubeClient`] implements both on top of a [`kube::Client`]. The `testing` feature adds
//! scripted in-memory doubles.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]

mod api;
pub use api::{EventStream, LogApi, LogStream, ResourceApi};

#[cfg(feature = "kube-client")]
#[cfg_attr(docsrs, doc(cfg(feature = "kube-client")))]
mod cluster;
#[cfg(feature = "kube-client")]
pub use cluster::KubeClient;

pub mod error;
pub use error::{Error, Result};

#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;
