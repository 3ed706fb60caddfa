//! User facing status lines
//!
//! Everything a follower prints about the lifecycle of the workload goes through here, so
//! the wording is the same no matter which path observed the state.
use crate::{error::Terminal, resource::Phase};

/// First running observation, tails are about to start
pub fn starting_tail(pod: &str) -> String {
    format!("Pod {pod:?} in \"Running\" state, starting up log tail\n")
}

/// Completed before it was ever observed running
pub fn completed_before_running(pod: &str) -> String {
    format!(
        "succeeded event for pod {pod:?} arrived before or in place of running event \
         so dumping logs now\n"
    )
}

/// Header above a one-shot log dump
pub fn log_dump_header(pod: &str, container: &str) -> String {
    format!("*** Pod {pod:?}, container {container:?}: ***\n\n")
}

/// One-shot log retrieval failed
pub fn log_dump_failed(container: &str, err: &dyn std::fmt::Display) -> String {
    format!("could not get logs for container {container:?}: {err}\n")
}

/// Pod completed successfully
pub fn pod_succeeded(pod: &str) -> String {
    format!("Pod {pod:?} has succeeded!\n")
}

/// Pod in some non-terminal phase
pub fn pod_in_state(pod: &str, phase: Phase) -> String {
    format!("Pod {pod:?} is in state {:?}...\n", phase.as_str())
}

/// Terminal failure line, with the pod dump appended for generic failures
pub fn terminal(outcome: &Terminal, pod_details: Option<&str>) -> String {
    match pod_details {
        Some(details) => format!("{outcome}.\nPod details:\n{details}\n"),
        None => format!("{outcome}.\n"),
    }
}

/// The follower gave up waiting for the owning resource to settle
pub fn gave_up_attribution(kind: &str, name: &str, pod: &str) -> String {
    format!(
        "gave up trying to get a {kind} {name:?} in a terminal state for pod {pod:?}, \
         proceeding with pod failure processing\n"
    )
}

/// The context ended before the workload did
pub fn stopped(kind: &str, name: &str, reason: &str) -> String {
    format!("{kind} {name:?} log following has stopped because: {reason:?}\n")
}

/// No events arrived within the inactivity window
pub fn no_events_yet(kind: &str, name: &str) -> String {
    format!("{kind} {name:?} log following has not observed any pod events yet.\n")
}

/// The pod finished before the subscription was established
pub fn completed_before_watch(kind: &str, name: &str) -> String {
    format!("{kind} {name:?}'s Pod completed before the log following's watch was established.\n")
}

/// The owning resource could not be read
pub fn owner_unreachable(kind: &str, name: &str, err: &dyn std::fmt::Display) -> String {
    format!("error accessing {kind} {name:?}: {err}\n")
}

/// The owning resource settled while no pod events were seen
pub fn owner_settled(kind: &str, name: &str, how: &str) -> String {
    format!("{kind} {name:?} has been {how}.\n")
}

/// Final line when following ends early
pub fn exiting(kind: &str, name: &str) -> String {
    format!("exiting log following for {kind} {name:?}\n")
}
