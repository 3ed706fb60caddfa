use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use serde_json::{json, Value};
use shp_core::BuildRun;

pub const OWNER: &str = "br";

fn container_status(name: &str, state: Value) -> Value {
    json!({ "name": name, "ready": false, "restartCount": 0, "image": "", "imageID": "", "state": state })
}

/// A scheduled pod of the `br` build run with the given phase and container states
pub fn pod_with(name: &str, phase: &str, containers: &[(&str, Value)]) -> Pod {
    serde_json::from_value(json!({
        "metadata": {
            "name": name,
            "namespace": "ns",
            "labels": { "buildrun.shipwright.io/name": OWNER }
        },
        "spec": {
            "containers": containers.iter().map(|(c, _)| json!({ "name": c })).collect::<Vec<_>>(),
            "nodeName": "node-1"
        },
        "status": {
            "phase": phase,
            "containerStatuses": containers
                .iter()
                .map(|(c, state)| container_status(c, state.clone()))
                .collect::<Vec<_>>()
        }
    }))
    .unwrap()
}

pub fn started() -> Value {
    json!({ "running": { "startedAt": "2024-05-01T10:00:00Z" } })
}

pub fn waiting() -> Value {
    json!({ "waiting": { "reason": "PodInitializing" } })
}

pub fn exited(code: i32) -> Value {
    let reason = if code == 0 { "Completed" } else { "Error" };
    json!({ "terminated": { "exitCode": code, "reason": reason } })
}

/// Pod with two containers `step-a` and `step-b`, all in the same state
pub fn pod(name: &str, phase: &str, state: Value) -> Pod {
    pod_with(name, phase, &[("step-a", state.clone()), ("step-b", state)])
}

pub fn with_deletion(mut pod: Pod) -> Pod {
    pod.metadata.deletion_timestamp = serde_json::from_value(json!("2024-05-01T10:05:00Z")).unwrap();
    pod
}

pub fn with_owner(mut pod: Pod, owner: &str) -> Pod {
    pod.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert("buildrun.shipwright.io/name".into(), owner.into());
    pod
}

pub fn build_run(name: &str, status: Value) -> BuildRun {
    serde_json::from_value(json!({
        "apiVersion": "shipwright.io/v1beta1",
        "kind": "BuildRun",
        "metadata": { "name": name, "namespace": "ns" },
        "spec": { "build": { "name": "b" } },
        "status": status,
    }))
    .unwrap()
}

pub fn build_run_condition(name: &str, status: &str, reason: &str) -> BuildRun {
    build_run(
        name,
        json!({ "conditions": [{ "type": "Succeeded", "status": status, "reason": reason }] }),
    )
}

/// Polls `cond` until it holds, panicking after a generous real-time bound
pub async fn eventually(cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
