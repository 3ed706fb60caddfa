//! Crate with the types shared by every part of shp
//!
//! This crate contains the resource model that the watch engine reasons about
//! (pods, build runs and task runs behind one [`WatchedResource`] adapter),
//! the canonical [`WatchEvent`] record and its decoding, the terminal-state
//! [`classify`] function, and the outcome sentinels callers match on.
//!
//! It does not talk to a cluster. The same information is re-exported from
//! `shp` under `shp::core`.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]

pub mod buildrun;
pub use buildrun::BuildRun;

pub mod taskrun;
pub use taskrun::TaskRun;

mod pod;

pub mod resource;
pub use resource::{
    ConditionStatus, FailureDetail, Locus, ObjectRef, Phase, SubUnit, SubUnitState, WatchedResource,
};

pub mod watch;
pub use watch::{EventType, Payload, RawEvent, WatchEvent};

pub mod outcome;
pub use outcome::{classify, Outcome};

pub mod params;
pub use params::Filter;

pub mod messages;

mod error;
pub use error::{DecodeError, Terminal};
