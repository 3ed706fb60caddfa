use k8s_openapi::api::core::v1::{ContainerState, Pod};
use kube::core::ResourceExt;

use crate::resource::{ConditionStatus, FailureDetail, Locus, Phase, SubUnit, SubUnitState, WatchedResource};

fn container_state(state: Option<&ContainerState>) -> SubUnitState {
    let Some(state) = state else {
        return SubUnitState::Waiting { reason: None };
    };
    if let Some(term) = &state.terminated {
        SubUnitState::Terminated {
            exit_code: term.exit_code,
            reason: term.reason.clone(),
            message: term.message.clone(),
        }
    } else if let Some(running) = &state.running {
        SubUnitState::Running {
            started_at: running.started_at.clone(),
        }
    } else {
        SubUnitState::Waiting {
            reason: state.waiting.as_ref().and_then(|w| w.reason.clone()),
        }
    }
}

impl WatchedResource for Pod {
    fn phase(&self) -> Phase {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map_or(Phase::Pending, Phase::parse)
    }

    fn succeeded_condition(&self) -> Option<ConditionStatus> {
        match self.phase() {
            Phase::Succeeded => Some(ConditionStatus::True),
            Phase::Failed => Some(ConditionStatus::False),
            Phase::Pending | Phase::Running | Phase::Unknown | Phase::Canceled => None,
        }
    }

    fn is_canceled(&self) -> bool {
        false
    }

    fn failure_detail(&self) -> Option<FailureDetail> {
        let status = self.status.as_ref()?;
        let failed_container = status.container_statuses.iter().flatten().find_map(|cs| {
            let term = cs.state.as_ref()?.terminated.as_ref()?;
            (term.exit_code != 0).then(|| (cs.name.clone(), term))
        });
        if let Some((container, term)) = failed_container {
            return Some(FailureDetail {
                reason: term.reason.clone(),
                message: term.message.clone(),
                locus: Some(Locus {
                    pod: Some(self.name_any()),
                    container: Some(container),
                }),
                snapshot: None,
            });
        }
        status.reason.as_ref()?;
        Some(FailureDetail {
            reason: status.reason.clone(),
            message: status.message.clone(),
            locus: Some(Locus {
                pod: Some(self.name_any()),
                container: None,
            }),
            snapshot: None,
        })
    }

    /// Containers in spec order, paired with their reported state
    fn sub_units(&self) -> Vec<SubUnit> {
        let statuses = self.status.as_ref().and_then(|s| s.container_statuses.as_ref());
        self.spec
            .iter()
            .flat_map(|spec| spec.containers.iter())
            .map(|c| {
                let state = statuses
                    .and_then(|all| all.iter().find(|cs| cs.name == c.name))
                    .map_or(SubUnitState::Waiting { reason: None }, |cs| {
                        container_state(cs.state.as_ref())
                    });
                SubUnit {
                    name: c.name.clone(),
                    state,
                }
            })
            .collect()
    }

    fn is_scheduled(&self) -> bool {
        if self.spec.as_ref().is_some_and(|s| s.node_name.is_some()) {
            return true;
        }
        self.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conds| conds.iter().find(|c| c.type_ == "PodScheduled"))
            .is_some_and(|c| c.status == "True")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(value: serde_json::Value) -> Pod {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn sub_units_follow_spec_order() {
        let p = pod(json!({
            "metadata": { "name": "br-pod", "namespace": "default" },
            "spec": { "containers": [{ "name": "step-source" }, { "name": "step-build" }] },
            "status": {
                "phase": "Running",
                "containerStatuses": [
                    { "name": "step-build", "ready": false, "restartCount": 0, "image": "", "imageID": "",
                      "state": { "waiting": { "reason": "PodInitializing" } } },
                    { "name": "step-source", "ready": true, "restartCount": 0, "image": "", "imageID": "",
                      "state": { "running": { "startedAt": "2024-05-01T10:00:00Z" } } }
                ]
            }
        }));
        let units = p.sub_units();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].name, "step-source");
        assert!(units[0].state.has_started());
        assert_eq!(units[1].state, SubUnitState::Waiting {
            reason: Some("PodInitializing".into())
        });
    }

    #[test]
    fn running_without_start_time_is_not_started() {
        let p = pod(json!({
            "metadata": { "name": "p" },
            "spec": { "containers": [{ "name": "c" }] },
            "status": { "phase": "Running", "containerStatuses": [
                { "name": "c", "ready": false, "restartCount": 0, "image": "", "imageID": "",
                  "state": { "running": {} } }
            ]}
        }));
        assert!(!p.sub_units()[0].state.has_started());
    }

    #[test]
    fn failure_detail_points_at_failed_container() {
        let p = pod(json!({
            "metadata": { "name": "p" },
            "spec": { "containers": [{ "name": "ok" }, { "name": "bad" }] },
            "status": { "phase": "Failed", "containerStatuses": [
                { "name": "ok", "ready": false, "restartCount": 0, "image": "", "imageID": "",
                  "state": { "terminated": { "exitCode": 0 } } },
                { "name": "bad", "ready": false, "restartCount": 0, "image": "", "imageID": "",
                  "state": { "terminated": { "exitCode": 2, "reason": "Error", "message": "boom" } } }
            ]}
        }));
        let detail = p.failure_detail().unwrap();
        assert_eq!(detail.reason.as_deref(), Some("Error"));
        assert_eq!(detail.locus.unwrap().container.as_deref(), Some("bad"));
        assert_eq!(p.succeeded_condition(), Some(ConditionStatus::False));
    }

    #[test]
    fn unscheduled_pod_without_phase_is_pending() {
        let p = pod(json!({ "metadata": { "name": "p" }, "spec": { "containers": [] } }));
        assert_eq!(p.phase(), Phase::Pending);
        assert!(!p.is_scheduled());
        assert!(p.failure_detail().is_none());
    }
}
