//! Follows the logs of the pod executing a build run
//!
//! The [`Follower`] watches pods, tails every container once it has actually started, and
//! ends with exactly one outcome once the pod completes:
//!
//! - on success the pod is returned, after a one-shot dump of the containers that were never
//!   tailed (covering pods that finish before they are observed running)
//! - on failure the owning resource is looked up for a bounded time to tell a genuine failure
//!   from a cancellation or a deletion, and the outcome is returned as
//!   [`Error::Terminal`](crate::watcher::Error::Terminal)
//!
//! All status lines and log lines go to one [`LogSink`].
use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use k8s_openapi::api::core::v1::Pod;
use kube::core::ResourceExt;
use parking_lot::RwLock;
use shp_client::{LogApi, ResourceApi};
use shp_core::{
    buildrun::BUILD_RUN_LABEL, classify, messages, BuildRun, FailureDetail, Filter, ObjectRef, Outcome, Phase,
    Terminal, WatchedResource,
};
use tokio_util::sync::CancellationToken;

use crate::{
    attribution::{attribute_failure, Attribution},
    sink::LogSink,
    tail::Tail,
    watcher::{self, Connected, Result, StopHandle, Watcher},
};

/// Follower tunables
#[derive(Clone, Debug)]
pub struct Config {
    /// Interval between owner lookups after a pod failure
    pub fail_poll_interval: Duration,
    /// How long to wait for the owner to settle after a pod failure
    pub fail_poll_timeout: Duration,
    /// Label on the pods naming their owner
    pub owner_label: String,
    /// Settings of the underlying pod watcher
    pub watcher: watcher::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fail_poll_interval: Duration::from_secs(1),
            fail_poll_timeout: Duration::from_secs(15),
            owner_label: BUILD_RUN_LABEL.to_string(),
            watcher: watcher::Config::default(),
        }
    }
}

impl Config {
    /// Sets the owner lookup interval and bound
    #[must_use]
    pub fn fail_poll(mut self, interval: Duration, timeout: Duration) -> Self {
        self.fail_poll_interval = interval;
        self.fail_poll_timeout = timeout;
        self
    }

    /// Sets the label naming the owner
    #[must_use]
    pub fn owner_label(mut self, label: &str) -> Self {
        self.owner_label = label.to_string();
        self
    }

    /// Sets the pod watcher settings
    #[must_use]
    pub fn watcher(mut self, watcher: watcher::Config) -> Self {
        self.watcher = watcher;
        self
    }
}

struct Shared<O, L, Own> {
    owners: O,
    logs: L,
    sink: LogSink,
    tail: Tail<L>,
    config: Config,
    target: RwLock<String>,
    entered_running: AtomicBool,
    stopped: AtomicBool,
    watch_stop: StopHandle,
    owner: PhantomData<fn() -> Own>,
}

/// A log follower that has not been connected yet
pub struct Follower<P, O, L, Own = BuildRun> {
    watcher: Watcher<Pod, P>,
    shared: Arc<Shared<O, L, Own>>,
}

/// A connected log follower
pub struct Following<P, O, L, Own = BuildRun> {
    connected: Connected<Pod, P>,
    shared: Arc<Shared<O, L, Own>>,
}

impl<P, O, L, Own> Follower<P, O, L, Own>
where
    P: ResourceApi<Pod>,
    O: ResourceApi<Own>,
    L: LogApi,
    Own: WatchedResource,
{
    /// Creates a follower writing to `sink`
    ///
    /// `pods` is watched, `owners` is read to attribute failures, and `logs` serves both the
    /// tails and the one-shot dumps.
    pub fn new(ctx: CancellationToken, pods: P, owners: O, logs: L, sink: LogSink, config: Config) -> Self {
        let watcher = Watcher::new(ctx, pods, config.watcher.clone());
        let shared = Arc::new(Shared {
            owners,
            tail: Tail::new(logs.clone(), sink.clone()),
            logs,
            sink,
            config,
            target: RwLock::new(String::new()),
            entered_running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            watch_stop: watcher.stop_handle(),
            owner: PhantomData,
        });

        let skip = {
            let shared = shared.clone();
            move |pod: &Pod| shared.skips(pod)
        };
        let on_event = {
            let shared = shared.clone();
            move |pod: Pod| {
                let shared = shared.clone();
                async move { shared.on_event(pod).await }
            }
        };
        let on_deleted = {
            let shared = shared.clone();
            move |pod: Pod| {
                let shared = shared.clone();
                async move { shared.on_deleted(pod).await }
            }
        };
        let on_timeout = {
            let shared = shared.clone();
            move |reason: &str| shared.on_timeout(reason)
        };
        let on_no_events_yet = {
            let shared = shared.clone();
            move |pods: Option<Vec<Pod>>| {
                let shared = shared.clone();
                async move { shared.on_no_events_yet(pods).await }
            }
        };
        let watcher = watcher
            .with_skip_fn(skip)
            .with_on_added_fn(on_event.clone())
            .with_on_modified_fn(on_event)
            .with_on_deleted_fn(on_deleted)
            .with_timeout_fn(on_timeout)
            .with_no_events_yet_fn(on_no_events_yet);
        Self { watcher, shared }
    }

    /// Restricts the follower to pods of the owner `name`
    ///
    /// May be called at any time, also after connecting.
    pub fn set_target_name(&self, name: &str) {
        self.shared.set_target_name(name);
    }

    /// A handle that stops following
    pub fn stop_handle(&self) -> StopHandle {
        self.watcher.stop_handle()
    }

    /// Starts watching pods matching `filter`
    ///
    /// # Errors
    ///
    /// Fails if the subscription could not be established.
    pub async fn connect(self, filter: &Filter) -> Result<Following<P, O, L, Own>> {
        let connected = self.watcher.connect(filter).await?;
        Ok(Following {
            connected,
            shared: self.shared,
        })
    }

    /// Connects and waits for completion
    ///
    /// # Errors
    ///
    /// See [`Follower::connect`] and [`Following::wait_for_completion`].
    pub async fn start(self, filter: &Filter) -> Result<Option<Pod>> {
        self.connect(filter).await?.wait_for_completion().await
    }
}

impl<P, O, L, Own> Following<P, O, L, Own>
where
    P: ResourceApi<Pod>,
    O: ResourceApi<Own>,
    L: LogApi,
    Own: WatchedResource,
{
    /// See [`Follower::set_target_name`]
    pub fn set_target_name(&self, name: &str) {
        self.shared.set_target_name(name);
    }

    /// A handle that stops following
    pub fn stop_handle(&self) -> StopHandle {
        self.connected.stop_handle()
    }

    /// Follows until the pod completes, the context ends or following is stopped
    ///
    /// Returns the succeeded pod, `None` when stopped early. Tails are stopped and awaited
    /// before returning.
    ///
    /// # Errors
    ///
    /// Watch faults, and the outcome of a failed pod as
    /// [`Error::Terminal`](crate::watcher::Error::Terminal).
    pub async fn wait_for_completion(self) -> Result<Option<Pod>> {
        let res = self.connected.wait_for_completion().await;
        self.shared.stop();
        self.shared.tail.join().await;
        res
    }
}

fn containers_unknown(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| (c.type_ == "Initialized" || c.type_ == "ContainersReady") && c.status == "Unknown")
        .map(|c| c.message.clone().unwrap_or_default())
}

impl<O, L, Own> Shared<O, L, Own>
where
    O: ResourceApi<Own>,
    L: LogApi,
    Own: WatchedResource,
{
    fn set_target_name(&self, name: &str) {
        *self.target.write() = name.to_string();
    }

    fn target(&self) -> String {
        self.target.read().clone()
    }

    /// Pods of other owners are skipped once a target is known
    fn skips(&self, pod: &Pod) -> bool {
        let target = self.target.read();
        !target.is_empty() && pod.labels().get(&self.config.owner_label) != Some(&*target)
    }

    /// The owner named by the target, or by the pod label
    fn owner_name(&self, pod: &Pod) -> Option<String> {
        let target = self.target();
        if !target.is_empty() {
            return Some(target);
        }
        pod.labels().get(&self.config.owner_label).cloned()
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(target_name = %self.target(), "stopping log follower");
        self.tail.stop();
        self.watch_stop.stop();
    }

    async fn on_event(&self, pod: Pod) -> Result<Option<Pod>> {
        let name = pod.name_any();
        match pod.phase() {
            Phase::Running => {
                self.start_tails(&pod);
                Ok(None)
            }
            Phase::Succeeded => self.succeeded(pod).await,
            Phase::Failed => {
                self.dump_untailed(&pod).await;
                self.failed(pod, false).await
            }
            phase => {
                self.sink.write_str(&messages::pod_in_state(&name, phase));
                if let Some(message) = containers_unknown(&pod) {
                    let outcome = Terminal::ContainersUnknown { name, message };
                    self.sink.write_str(&messages::terminal(&outcome, None));
                    self.stop();
                    return Err(outcome.into());
                }
                Ok(None)
            }
        }
    }

    async fn on_deleted(&self, pod: Pod) -> Result<Option<Pod>> {
        if pod.phase() == Phase::Succeeded {
            return self.succeeded(pod).await;
        }
        self.failed(pod, true).await
    }

    /// Tails every container that has a recorded start time
    fn start_tails(&self, pod: &Pod) {
        let pod_ref = ObjectRef::from_obj(pod);
        for unit in pod.sub_units() {
            if !unit.state.has_started() || self.tail.is_started(&pod_ref.name, &unit.name) {
                continue;
            }
            if !self.entered_running.swap(true, Ordering::SeqCst) {
                self.sink.write_str(&messages::starting_tail(&pod_ref.name));
            }
            self.tail.start(&pod_ref, &unit.name);
        }
    }

    /// One-shot dump of the containers that were never tailed, as a single write
    async fn dump_untailed(&self, pod: &Pod) {
        let pod_ref = ObjectRef::from_obj(pod);
        let mut out = String::new();
        for unit in pod.sub_units() {
            if self.tail.is_started(&pod_ref.name, &unit.name) {
                continue;
            }
            match self.logs.fetch_logs(&pod_ref, &unit.name).await {
                Ok(logs) => {
                    out.push_str(&messages::log_dump_header(&pod_ref.name, &unit.name));
                    out.push_str(&logs);
                    out.push('\n');
                }
                Err(err) => out.push_str(&messages::log_dump_failed(&unit.name, &err)),
            }
        }
        if !out.is_empty() {
            self.sink.write_str(&out);
        }
    }

    async fn succeeded(&self, pod: Pod) -> Result<Option<Pod>> {
        let name = pod.name_any();
        if !self.entered_running.load(Ordering::SeqCst) {
            self.sink.write_str(&messages::completed_before_running(&name));
        }
        self.dump_untailed(&pod).await;
        self.sink.write_str(&messages::pod_succeeded(&name));
        self.stop();
        Ok(Some(pod))
    }

    /// Attributes a pod failure to its owner and reports the outcome
    async fn failed(&self, pod: Pod, pod_gone: bool) -> Result<Option<Pod>> {
        let pod_name = pod.name_any();
        let kind = Own::kind_name();
        let owner_name = self.owner_name(&pod);
        let attribution = match &owner_name {
            Some(owner) => Some(
                attribute_failure::<Own, O>(
                    &self.owners,
                    owner,
                    self.config.fail_poll_interval,
                    self.config.fail_poll_timeout,
                )
                .await,
            ),
            None => None,
        };
        let owner_name = owner_name.unwrap_or_else(|| pod_name.clone());
        if matches!(attribution, Some(Attribution::TimedOut)) {
            self.sink
                .write_str(&messages::gave_up_attribution(&kind, &owner_name, &pod_name));
        }
        let owner_outcome = match &attribution {
            Some(Attribution::Found(owner)) => Some(classify(Some(owner))),
            Some(Attribution::Gone) => Some(Outcome::Deleted),
            Some(Attribution::TimedOut) | None => None,
        };

        let mut pod_details = None;
        let outcome = match owner_outcome {
            Some(Outcome::Deleted) => Terminal::Deleted {
                kind,
                name: owner_name,
            },
            Some(Outcome::Canceled) => Terminal::Canceled {
                kind,
                name: owner_name,
            },
            _ if pod_gone || pod.deletion_timestamp().is_some() => Terminal::PodDeleted { name: pod_name },
            owner_outcome => {
                let detail = match owner_outcome {
                    Some(Outcome::Failed(detail)) if detail.has_reason() => detail,
                    _ => pod
                        .failure_detail()
                        .filter(FailureDetail::has_reason)
                        .unwrap_or_else(|| FailureDetail::generic(&pod)),
                };
                pod_details = detail.snapshot;
                Terminal::Failed {
                    kind,
                    name: owner_name,
                    reason: detail.reason,
                    message: detail.message,
                    locus: detail.locus,
                }
            }
        };
        self.sink.write_str(&messages::terminal(&outcome, pod_details.as_deref()));
        self.stop();
        Err(outcome.into())
    }

    fn on_timeout(&self, reason: &str) {
        self.sink
            .write_str(&messages::stopped(&Own::kind_name(), &self.target(), reason));
        self.stop();
    }

    /// Checks on the owner when no pod events have been seen
    async fn on_no_events_yet(&self, pods: Option<Vec<Pod>>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let kind = Own::kind_name();
        let target = self.target();
        let completed = pods
            .iter()
            .flatten()
            .any(|pod| matches!(pod.phase(), Phase::Succeeded | Phase::Failed));
        if completed {
            self.sink.write_str(&messages::completed_before_watch(&kind, &target));
        } else {
            self.sink.write_str(&messages::no_events_yet(&kind, &target));
        }
        if target.is_empty() {
            return;
        }
        let owner = match self.owners.get(&target).await {
            Ok(owner) => owner,
            Err(err) => {
                self.sink.write_str(&messages::owner_unreachable(&kind, &target, &err));
                return;
            }
        };
        let how = match classify(owner.as_ref()) {
            Outcome::Succeeded => "marked as successful",
            Outcome::Failed(_) => "marked as failed",
            Outcome::Canceled => "canceled",
            Outcome::Deleted => "deleted",
            Outcome::Pending | Outcome::Running | Outcome::Unknown => return,
        };
        self.sink.write_str(&messages::owner_settled(&kind, &target, how));
        self.sink.write_str(&messages::exiting(&kind, &target));
        self.stop();
    }
}
