//! Crate with the watch-and-react runtime of shp
//!
//! This crate contains the building blocks that observe a build run from the client side
//! and react to it:
//!
//! - [`Watcher`], a generic event loop over one resource kind with registered handlers,
//!   cancellation and an inactivity reconciliation
//! - [`Follower`], which follows the logs of the pod executing a build run and settles on
//!   exactly one outcome
//! - [`wait::await_terminal`] for callers that only care about the outcome
//!
//! Newcomers should generally get started with the [`Follower`].

#![deny(unsafe_code)]
// Triggered by the kube CustomResource derive
#![allow(clippy::default_trait_access)]

pub mod attribution;
pub mod follower;
pub mod sink;
pub mod tail;
pub mod wait;
pub mod watcher;

pub use attribution::{attribute_failure, Attribution};
pub use follower::{Follower, Following};
pub use sink::LogSink;
pub use watcher::{Connected, StopHandle, Watcher};

#[cfg(test)]
mod fixtures;
