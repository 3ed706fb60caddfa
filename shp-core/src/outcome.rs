//! Classifies resource snapshots into lifecycle outcomes
use kube::core::ResourceExt;

use crate::{
    error::Terminal,
    resource::{ConditionStatus, FailureDetail, Phase, WatchedResource},
};

/// What a resource snapshot says about the workload it represents
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Completed successfully
    Succeeded,
    /// Completed with a failure
    Failed(FailureDetail),
    /// Canceled on request
    Canceled,
    /// Gone, or marked for deletion
    Deleted,
    /// Not yet scheduled onto anything that executes it
    Pending,
    /// Executing
    Running,
    /// Not classifiable yet, keep watching
    Unknown,
}

impl Outcome {
    /// Whether no further meaningful transition is expected
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Outcome::Succeeded | Outcome::Failed(_) | Outcome::Canceled | Outcome::Deleted
        )
    }

    /// Converts a terminal non-success outcome into its [`Terminal`] sentinel
    ///
    /// Non-terminal outcomes and [`Outcome::Succeeded`] are `Ok`.
    pub fn into_result(self, kind: &str, name: &str) -> Result<(), Terminal> {
        match self {
            Outcome::Failed(detail) => Err(Terminal::Failed {
                kind: kind.to_string(),
                name: name.to_string(),
                reason: detail.reason,
                message: detail.message,
                locus: detail.locus,
            }),
            Outcome::Canceled => Err(Terminal::Canceled {
                kind: kind.to_string(),
                name: name.to_string(),
            }),
            Outcome::Deleted => Err(Terminal::Deleted {
                kind: kind.to_string(),
                name: name.to_string(),
            }),
            Outcome::Succeeded | Outcome::Pending | Outcome::Running | Outcome::Unknown => Ok(()),
        }
    }
}

/// Classifies a snapshot, `None` meaning the object no longer exists
///
/// The first matching rule wins:
///
/// 1. no object, or a deletion timestamp: [`Outcome::Deleted`]
/// 2. an explicit cancel marker: [`Outcome::Canceled`]
/// 3. `Succeeded` condition `True`: [`Outcome::Succeeded`]
/// 4. `Succeeded` condition `False`: [`Outcome::Failed`], with the recorded failure detail or
///    a generic one carrying the serialized snapshot
/// 5. condition absent or `Unknown` and not scheduled yet: [`Outcome::Pending`]
/// 6. running phase: [`Outcome::Running`], anything else is [`Outcome::Unknown`]
pub fn classify<K: WatchedResource>(obj: Option<&K>) -> Outcome {
    let Some(obj) = obj else {
        return Outcome::Deleted;
    };
    if obj.deletion_timestamp().is_some() {
        return Outcome::Deleted;
    }
    if obj.is_canceled() {
        return Outcome::Canceled;
    }
    match obj.succeeded_condition() {
        Some(ConditionStatus::True) => Outcome::Succeeded,
        Some(ConditionStatus::False) => {
            Outcome::Failed(obj.failure_detail().unwrap_or_else(|| FailureDetail::generic(obj)))
        }
        Some(ConditionStatus::Unknown) | None if !obj.is_scheduled() => Outcome::Pending,
        Some(ConditionStatus::Unknown) | None => {
            if obj.phase() == Phase::Running {
                Outcome::Running
            } else {
                Outcome::Unknown
            }
        }
    }
}

/// Classifies and converts in one step, see [`Outcome::into_result`]
pub fn terminal_result<K: WatchedResource>(
    kind: &str,
    name: &str,
    obj: Option<&K>,
) -> Result<Outcome, Terminal> {
    let outcome = classify(obj);
    outcome.clone().into_result(kind, name)?;
    Ok(outcome)
}

/// Convenience for [`terminal_result`] on an existing object
pub fn terminal_result_of<K: WatchedResource>(obj: &K) -> Result<Outcome, Terminal> {
    terminal_result(&K::kind_name(), &obj.name_any(), Some(obj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BuildRun, TaskRun};
    use k8s_openapi::api::core::v1::Pod;
    use serde_json::json;

    fn build_run(status: serde_json::Value) -> BuildRun {
        serde_json::from_value(json!({
            "apiVersion": "shipwright.io/v1beta1",
            "kind": "BuildRun",
            "metadata": { "name": "br", "namespace": "ns" },
            "spec": { "build": { "name": "b" } },
            "status": status,
        }))
        .unwrap()
    }

    fn pod(phase: &str, node: Option<&str>) -> Pod {
        serde_json::from_value(json!({
            "metadata": { "name": "p" },
            "spec": { "containers": [{ "name": "c" }], "nodeName": node },
            "status": { "phase": phase }
        }))
        .unwrap()
    }

    #[test]
    fn missing_object_is_deleted() {
        assert_eq!(classify::<BuildRun>(None), Outcome::Deleted);
    }

    #[test]
    fn deletion_timestamp_wins_over_everything() {
        let mut br = build_run(json!({ "conditions": [{ "type": "Succeeded", "status": "True" }] }));
        br.spec.state = Some(crate::buildrun::CANCELED_STATE.into());
        br.metadata.deletion_timestamp = serde_json::from_value(json!("2024-05-01T10:00:00Z")).unwrap();
        assert_eq!(classify(Some(&br)), Outcome::Deleted);
    }

    #[test]
    fn cancel_marker_beats_failed_condition() {
        let br = build_run(json!({
            "conditions": [{ "type": "Succeeded", "status": "False", "reason": "BuildRunCanceled" }]
        }));
        assert_eq!(classify(Some(&br)), Outcome::Canceled);
        assert_eq!(br.phase(), Phase::Canceled);
    }

    #[test]
    fn true_condition_succeeds() {
        let br = build_run(json!({ "conditions": [{ "type": "Succeeded", "status": "True" }] }));
        assert_eq!(classify(Some(&br)), Outcome::Succeeded);
    }

    #[test]
    fn false_condition_carries_recorded_detail() {
        let br = build_run(json!({
            "conditions": [{ "type": "Succeeded", "status": "False", "reason": "Failed" }],
            "failureDetails": {
                "reason": "StepFailed",
                "message": "step-build exited with 1",
                "location": { "pod": "br-pod", "container": "step-build" }
            }
        }));
        let Outcome::Failed(detail) = classify(Some(&br)) else {
            panic!("expected failure");
        };
        assert_eq!(detail.reason.as_deref(), Some("StepFailed"));
        assert_eq!(detail.locus.unwrap().container.as_deref(), Some("step-build"));
        assert!(detail.snapshot.is_none());
    }

    #[test]
    fn false_condition_without_detail_is_generic() {
        let p = pod("Failed", Some("node-1"));
        let Outcome::Failed(detail) = classify(Some(&p)) else {
            panic!("expected failure");
        };
        assert!(!detail.has_reason());
        assert!(detail.snapshot.unwrap().contains("\"phase\": \"Failed\""));
    }

    #[test]
    fn unscheduled_is_pending() {
        let br = build_run(json!({
            "conditions": [{ "type": "Succeeded", "status": "Unknown", "reason": "Pending" }]
        }));
        assert_eq!(classify(Some(&br)), Outcome::Pending);
        assert_eq!(classify(Some(&pod("Pending", None))), Outcome::Pending);
    }

    #[test]
    fn scheduled_and_running() {
        let br = build_run(json!({
            "conditions": [{ "type": "Succeeded", "status": "Unknown", "reason": "Running" }],
            "taskRunName": "br-xyz"
        }));
        assert_eq!(classify(Some(&br)), Outcome::Running);
        assert_eq!(classify(Some(&pod("Running", Some("node-1")))), Outcome::Running);
    }

    #[test]
    fn scheduled_but_unclear_is_unknown() {
        assert_eq!(classify(Some(&pod("Unknown", Some("node-1")))), Outcome::Unknown);
        assert_eq!(classify(Some(&pod("Pending", Some("node-1")))), Outcome::Unknown);
    }

    #[test]
    fn task_run_cancel_and_step_locus() {
        let tr: TaskRun = serde_json::from_value(json!({
            "apiVersion": "tekton.dev/v1",
            "kind": "TaskRun",
            "metadata": { "name": "tr" },
            "spec": {},
            "status": {
                "podName": "tr-pod",
                "conditions": [{ "type": "Succeeded", "status": "False", "reason": "Failed" }],
                "steps": [{ "name": "build", "container": "step-build", "terminated": { "exitCode": 1 } }]
            }
        }))
        .unwrap();
        let Outcome::Failed(detail) = classify(Some(&tr)) else {
            panic!("expected failure");
        };
        assert_eq!(detail.locus.unwrap().pod.as_deref(), Some("tr-pod"));

        let mut canceled = tr.clone();
        canceled.spec.status = Some(crate::taskrun::CANCELED_STATUS.into());
        assert_eq!(classify(Some(&canceled)), Outcome::Canceled);
    }

    #[test]
    fn into_result_maps_sentinels() {
        assert_eq!(Outcome::Succeeded.into_result("BuildRun", "br"), Ok(()));
        assert_eq!(
            Outcome::Canceled.into_result("BuildRun", "br"),
            Err(Terminal::Canceled {
                kind: "BuildRun".into(),
                name: "br".into()
            })
        );
        assert!(!Outcome::Running.is_terminal());
        assert!(Outcome::Deleted.is_terminal());
    }
}
