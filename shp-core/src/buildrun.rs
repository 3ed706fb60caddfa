//! The Shipwright `BuildRun` resource, reduced to the fields the watch engine reads
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::resource::{ConditionStatus, FailureDetail, Locus, Phase, SubUnit, WatchedResource};

/// Value of `spec.state` requesting cancellation
pub const CANCELED_STATE: &str = "BuildRunCanceled";

/// Label that build-run pods carry, pointing back at their `BuildRun`
pub const BUILD_RUN_LABEL: &str = "buildrun.shipwright.io/name";

/// Spec of a `BuildRun`
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "shipwright.io",
    version = "v1beta1",
    kind = "BuildRun",
    namespaced,
    status = "BuildRunStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct BuildRunSpec {
    /// The build this run executes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<ReferencedBuild>,
    /// Desired state, set to [`CANCELED_STATE`] to cancel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Service account used by the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    /// Maximum duration, e.g. `10m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Reference to the `Build` being run
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ReferencedBuild {
    /// Name of an existing `Build`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Observed state of a `BuildRun`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildRunStatus {
    /// Conditions, of which `Succeeded` is the one that matters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Name of the `TaskRun` executing this run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_run_name: Option<String>,
    /// When execution started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,
    /// When execution finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Time>,
    /// Recorded failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_details: Option<FailureDetails>,
}

/// A status condition, as shared by Shipwright and Tekton
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `Succeeded`
    #[serde(rename = "type")]
    pub type_: String,
    /// `True`, `False` or `Unknown`
    pub status: String,
    /// Machine readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Last time the condition changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

/// Failure recorded on a `BuildRun`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct FailureDetails {
    /// Short reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Pod and container that failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Locus>,
}

/// Finds the `Succeeded` condition in a condition list
pub(crate) fn succeeded(conditions: &[Condition]) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == "Succeeded")
}

/// Phase of a condition-driven resource, read off its `Succeeded` condition
pub(crate) fn condition_phase(cond: Option<&Condition>, canceled: bool) -> Phase {
    let Some(cond) = cond else {
        return Phase::Pending;
    };
    match ConditionStatus::parse(&cond.status) {
        ConditionStatus::True => Phase::Succeeded,
        ConditionStatus::False if canceled => Phase::Canceled,
        ConditionStatus::False => Phase::Failed,
        ConditionStatus::Unknown => match cond.reason.as_deref() {
            Some("Pending") => Phase::Pending,
            Some("Running") => Phase::Running,
            _ => Phase::Unknown,
        },
    }
}

impl BuildRun {
    fn succeeded(&self) -> Option<&Condition> {
        self.status.as_ref().and_then(|s| succeeded(&s.conditions))
    }
}

impl WatchedResource for BuildRun {
    fn phase(&self) -> Phase {
        condition_phase(self.succeeded(), self.is_canceled())
    }

    fn succeeded_condition(&self) -> Option<ConditionStatus> {
        self.succeeded().map(|c| ConditionStatus::parse(&c.status))
    }

    fn is_canceled(&self) -> bool {
        self.spec.state.as_deref() == Some(CANCELED_STATE)
            || self.succeeded().and_then(|c| c.reason.as_deref()) == Some(CANCELED_STATE)
    }

    fn failure_detail(&self) -> Option<FailureDetail> {
        let status = self.status.as_ref()?;
        if let Some(details) = &status.failure_details {
            return Some(FailureDetail {
                reason: details.reason.clone(),
                message: details.message.clone(),
                locus: details.location.clone(),
                snapshot: None,
            });
        }
        let cond = succeeded(&status.conditions)?;
        cond.reason.as_ref()?;
        Some(FailureDetail {
            reason: cond.reason.clone(),
            message: cond.message.clone(),
            locus: None,
            snapshot: None,
        })
    }

    fn sub_units(&self) -> Vec<SubUnit> {
        Vec::new()
    }

    fn is_scheduled(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.task_run_name.is_some() || s.start_time.is_some())
    }
}
