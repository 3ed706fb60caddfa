//! Client-side watch-and-react engine for Shipwright build runs
//!
//! This crate is a facade over the crates that make up shp:
//!
//! - [`core`] holds the resource model, the canonical watch events and the terminal-state
//!   classifier. It never talks to a cluster.
//! - [`client`] (feature `client`) holds the cluster collaborators the engine consumes:
//!   [`ResourceApi`](client::ResourceApi) and [`LogApi`](client::LogApi), implemented by
//!   [`KubeClient`](client::KubeClient).
//! - [`runtime`] (feature `runtime`) holds the generic [`Watcher`](runtime::Watcher) and the
//!   build run log [`Follower`](runtime::Follower).
//!
//! # Following a build run
//!
//! ```no_run
//! use shp::{client::KubeClient, runtime::{follower, Follower, LogSink}, BuildRun, Filter};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = KubeClient::try_default().await?.within("builds");
//!     let follower = Follower::<_, _, _, BuildRun>::new(
//!         CancellationToken::new(),
//!         client.clone(),
//!         client.clone(),
//!         client,
//!         LogSink::stdout(),
//!         follower::Config::default(),
//!     );
//!     follower.set_target_name("buildrun-sample");
//!     match follower.start(&Filter::for_build_run("buildrun-sample")).await? {
//!         Some(pod) => println!("{:?} succeeded", pod.metadata.name),
//!         None => println!("stopped following"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Waiting on any resource
//!
//! The [`Watcher`](runtime::Watcher) works on every [`WatchedResource`]: pods, build runs
//! and task runs. Handlers receive typed snapshots and complete the wait by returning
//! `Ok(Some(obj))`.
//!
//! ```no_run
//! use shp::{client::KubeClient, runtime::wait::{await_terminal, into_outcome}, TaskRun};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClient::try_default().await?;
//! let ctx = CancellationToken::new();
//! let done = await_terminal::<TaskRun, _>(ctx, client, "tr-1", Default::default()).await;
//! if let Some(tr) = into_outcome(done)? {
//!     println!("{:?} finished", tr.metadata.name);
//! }
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]

macro_rules! cfg_client {
    ($($item:item)*) => {
        $(
            #[cfg_attr(docsrs, doc(cfg(any(feature = "client", feature = "testing"))))]
            #[cfg(any(feature = "client", feature = "testing"))]
            $item
        )*
    }
}

cfg_client! {
    pub use shp_client as client;
    #[doc(inline)]
    pub use shp_client::{Error, LogApi, ResourceApi};
}

#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
#[doc(inline)]
pub use shp_runtime as runtime;

#[doc(inline)]
pub use shp_core as core;

pub use crate::core::{
    classify, BuildRun, EventType, Filter, Outcome, TaskRun, Terminal, WatchEvent, WatchedResource,
};
