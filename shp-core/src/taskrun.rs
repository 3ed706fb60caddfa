//! The Tekton `TaskRun` resource that executes a `BuildRun`
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::{
    buildrun::{condition_phase, succeeded, Condition},
    resource::{ConditionStatus, FailureDetail, Locus, Phase, SubUnit, SubUnitState, WatchedResource},
};

/// Value of `spec.status` requesting cancellation
pub const CANCELED_STATUS: &str = "TaskRunCancelled";

/// Spec of a `TaskRun`
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "tekton.dev",
    version = "v1",
    kind = "TaskRun",
    namespaced,
    status = "TaskRunStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunSpec {
    /// Set to [`CANCELED_STATUS`] to cancel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Message explaining `status`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

/// Observed state of a `TaskRun`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunStatus {
    /// Conditions, `Succeeded` drives the lifecycle
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Pod executing the steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    /// When execution started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,
    /// When execution finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Time>,
    /// Per-step states
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepState>,
}

/// State of one step
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    /// Step name
    #[serde(default)]
    pub name: String,
    /// Container backing the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Set while waiting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<StepWaiting>,
    /// Set while running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<StepRunning>,
    /// Set once finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<StepTerminated>,
}

/// Waiting step
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StepWaiting {
    /// Why
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Running step
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepRunning {
    /// Start time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Time>,
}

/// Finished step
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepTerminated {
    /// Exit code
    #[serde(default)]
    pub exit_code: i32,
    /// Short reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepState {
    fn state(&self) -> SubUnitState {
        if let Some(t) = &self.terminated {
            SubUnitState::Terminated {
                exit_code: t.exit_code,
                reason: t.reason.clone(),
                message: t.message.clone(),
            }
        } else if let Some(r) = &self.running {
            SubUnitState::Running {
                started_at: r.started_at.clone(),
            }
        } else {
            SubUnitState::Waiting {
                reason: self.waiting.as_ref().and_then(|w| w.reason.clone()),
            }
        }
    }
}

impl TaskRun {
    fn succeeded(&self) -> Option<&Condition> {
        self.status.as_ref().and_then(|s| succeeded(&s.conditions))
    }
}

impl WatchedResource for TaskRun {
    fn phase(&self) -> Phase {
        condition_phase(self.succeeded(), self.is_canceled())
    }

    fn succeeded_condition(&self) -> Option<ConditionStatus> {
        self.succeeded().map(|c| ConditionStatus::parse(&c.status))
    }

    fn is_canceled(&self) -> bool {
        self.spec.status.as_deref() == Some(CANCELED_STATUS)
            || self.succeeded().and_then(|c| c.reason.as_deref()) == Some(CANCELED_STATUS)
    }

    fn failure_detail(&self) -> Option<FailureDetail> {
        let status = self.status.as_ref()?;
        let failed_step = status
            .steps
            .iter()
            .find(|s| s.terminated.as_ref().is_some_and(|t| t.exit_code != 0));
        let cond = succeeded(&status.conditions);
        if failed_step.is_none() && cond.and_then(|c| c.reason.as_ref()).is_none() {
            return None;
        }
        Some(FailureDetail {
            reason: cond.and_then(|c| c.reason.clone()),
            message: cond.and_then(|c| c.message.clone()),
            locus: failed_step.map(|step| Locus {
                pod: status.pod_name.clone(),
                container: step.container.clone().or_else(|| Some(step.name.clone())),
            }),
            snapshot: None,
        })
    }

    fn sub_units(&self) -> Vec<SubUnit> {
        self.status
            .iter()
            .flat_map(|s| s.steps.iter())
            .map(|step| SubUnit {
                name: step.container.clone().unwrap_or_else(|| step.name.clone()),
                state: step.state(),
            })
            .collect()
    }

    fn is_scheduled(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.pod_name.is_some())
    }
}
