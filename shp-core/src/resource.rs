//! The adapter every watched resource kind implements
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Lifecycle phase of a watched resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Accepted but not yet running
    Pending,
    /// At least one sub-unit is running
    Running,
    /// Completed successfully
    Succeeded,
    /// Completed with a failure
    Failed,
    /// State could not be determined
    Unknown,
    /// Canceled on request
    Canceled,
}

impl Phase {
    /// The phase as it is spelled by the cluster
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
            Phase::Unknown => "Unknown",
            Phase::Canceled => "Canceled",
        }
    }

    /// Parses a pod-style phase string, anything unrecognised is `Unknown`
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Phase::Pending,
            "Running" => Phase::Running,
            "Succeeded" => Phase::Succeeded,
            "Failed" => Phase::Failed,
            "Canceled" | "Cancelled" => Phase::Canceled,
            _ => Phase::Unknown,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a `Succeeded`-style condition
///
/// See <https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#condition-v1-meta>
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// Not determined yet
    Unknown,
}

impl ConditionStatus {
    /// Parses the string form, anything unrecognised is `Unknown`
    pub fn parse(status: &str) -> Self {
        match status {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

/// Where a failure happened
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locus {
    /// Pod the failure was recorded against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    /// Container (or step) the failure was recorded against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

/// Recorded reason for a failed resource
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FailureDetail {
    /// Short machine-readable reason
    pub reason: Option<String>,
    /// Human readable message
    pub message: Option<String>,
    /// Sub-unit that failed, if known
    pub locus: Option<Locus>,
    /// Serialized snapshot attached when no recorded detail was available
    pub snapshot: Option<String>,
}

impl FailureDetail {
    /// A failure without recorded detail, carrying the resource as pretty JSON for diagnostics
    pub fn generic<K: Serialize>(obj: &K) -> Self {
        Self {
            snapshot: serde_json::to_string_pretty(obj).ok(),
            ..Self::default()
        }
    }

    /// Whether the resource recorded an actual reason
    pub fn has_reason(&self) -> bool {
        self.reason.as_deref().is_some_and(|r| !r.is_empty())
    }
}

/// Lifecycle state of one sub-unit (container or step)
#[derive(Clone, Debug, PartialEq)]
pub enum SubUnitState {
    /// Not started yet
    Waiting {
        /// Why it is waiting, e.g. `ContainerCreating`
        reason: Option<String>,
    },
    /// Reported as running
    ///
    /// A report without `started_at` is not trusted to mean the process is up.
    Running {
        /// When the sub-unit actually started
        started_at: Option<Time>,
    },
    /// Finished
    Terminated {
        /// Process exit code
        exit_code: i32,
        /// Short reason
        reason: Option<String>,
        /// Message
        message: Option<String>,
    },
}

impl SubUnitState {
    /// Running with a recorded start time
    pub fn has_started(&self) -> bool {
        matches!(self, SubUnitState::Running { started_at: Some(_) })
    }
}

/// A named execution unit within a watched resource
#[derive(Clone, Debug, PartialEq)]
pub struct SubUnit {
    /// Container or step name
    pub name: String,
    /// Current state
    pub state: SubUnitState,
}

/// Namespace and name of an object
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Namespace, `None` for cluster scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectRef {
    /// A reference to a namespaced object
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Reference an existing object
    pub fn from_obj<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A resource kind the watch engine can follow
///
/// Implemented for [`Pod`](k8s_openapi::api::core::v1::Pod), [`BuildRun`](crate::BuildRun)
/// and [`TaskRun`](crate::TaskRun). Everything the classifier needs is read through this trait,
/// so the watcher and the classifier stay generic over the kind.
pub trait WatchedResource:
    Resource<DynamicType = ()> + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Current phase
    fn phase(&self) -> Phase;

    /// Status of the `Succeeded` condition, if one was recorded
    fn succeeded_condition(&self) -> Option<ConditionStatus>;

    /// Whether cancellation was explicitly requested
    fn is_canceled(&self) -> bool;

    /// Recorded failure detail, if any
    fn failure_detail(&self) -> Option<FailureDetail>;

    /// Named sub-units and their states
    fn sub_units(&self) -> Vec<SubUnit>;

    /// Whether the resource has been bound to something that executes it
    fn is_scheduled(&self) -> bool;

    /// Display kind, e.g. `BuildRun`
    fn kind_name() -> String {
        Self::kind(&()).into_owned()
    }

    /// Soft-deletion marker
    fn deletion_timestamp(&self) -> Option<&Time> {
        self.meta().deletion_timestamp.as_ref()
    }
}
