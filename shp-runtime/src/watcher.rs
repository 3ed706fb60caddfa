//! Watches resources of one kind and dispatches their events to registered handlers
//!
//! A [`Watcher`] is configured with handlers first, then [`Watcher::connect`]ed, which
//! consumes it. The returned [`Connected`] runs the event loop in
//! [`Connected::wait_for_completion`] until exactly one of these happens:
//!
//! - a handler returns `Ok(Some(obj))`, the loop completes with that object
//! - a handler or the decoding of an event fails, the loop completes with the error
//! - the context token is cancelled or the configured deadline passes, timeout handlers
//!   are invoked with `"context done"` and the loop completes with `Ok(None)`
//! - [`StopHandle::stop`] is called, the loop completes with `Ok(None)`
//!
//! If no event arrives within [`Config::inactivity`], the current state is listed once and
//! matching terminal snapshots are dispatched as if they had arrived as `Modified` events.
//! This covers objects that finished before the subscription was established.
use std::{future::Future, time::Duration};

use futures::{future::BoxFuture, FutureExt, StreamExt};
use kube::core::ResourceExt;
use shp_client::{EventStream, ResourceApi};
use shp_core::{classify, DecodeError, EventType, Filter, Outcome, Terminal, WatchEvent, WatchedResource};
use thiserror::Error;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Reason handed to timeout handlers when the context ends
pub const CONTEXT_DONE: &str = "context done";

/// Errors ending a watch loop
#[derive(Error, Debug)]
pub enum Error {
    /// The subscription could not be established
    #[error("failed to start watching: {0}")]
    WatchStartFailed(#[source] shp_client::Error),
    /// The subscription reported an error
    #[error("watch stream failed: {0}")]
    WatchFailed(#[source] shp_client::Error),
    /// The subscription ended while the watch was still waiting
    #[error("watch stream closed unexpectedly")]
    WatchClosed,
    /// An event payload was not a valid object of the watched kind
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The workload reached a non-successful terminal state
    #[error(transparent)]
    Terminal(#[from] Terminal),
    /// A handler failed for reasons of its own
    #[error("handler failed: {0}")]
    Handler(String),
}

impl Error {
    /// Whether this is a fault of the watch machinery rather than an outcome of the workload
    pub fn is_fault(&self) -> bool {
        !matches!(self, Error::Terminal(_))
    }

    /// The outcome sentinel, if this is one
    pub fn terminal(&self) -> Option<&Terminal> {
        match self {
            Error::Terminal(t) => Some(t),
            _ => None,
        }
    }
}

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Handler for one event type, `Ok(Some(_))` completes the watch
pub type EventFn<K> = Box<dyn Fn(K) -> BoxFuture<'static, Result<Option<K>>> + Send + Sync>;
/// Returns true for objects the watcher should ignore
pub type SkipFn<K> = Box<dyn Fn(&K) -> bool + Send + Sync>;
/// Invoked with the reason when the context ends before the watch completes
pub type TimeoutFn = Box<dyn Fn(&str) + Send + Sync>;
/// Invoked after an inactivity reconciliation that did not complete the watch
pub type NoEventsYetFn<K> = Box<dyn Fn(Option<Vec<K>>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Watcher tunables
#[derive(Clone, Debug)]
pub struct Config {
    /// Overall deadline, measured from [`Watcher::connect`]
    ///
    /// Reaching it behaves like cancelling the context.
    pub timeout: Option<Duration>,
    /// How long to wait for the first event before reconciling with a list
    pub inactivity: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: None,
            inactivity: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Sets the overall deadline
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the inactivity interval
    #[must_use]
    pub fn inactivity(mut self, inactivity: Duration) -> Self {
        self.inactivity = inactivity;
        self
    }
}

/// Stops a watcher from outside its event loop
///
/// Stopping is idempotent and may race with the loop.
#[derive(Clone, Debug)]
pub struct StopHandle(CancellationToken);

impl StopHandle {
    /// Requests the loop to end with `Ok(None)`
    pub fn stop(&self) {
        self.0.cancel();
    }

    /// Whether a stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.0.is_cancelled()
    }
}

struct Handlers<K> {
    skip: Vec<SkipFn<K>>,
    added: Vec<EventFn<K>>,
    modified: Vec<EventFn<K>>,
    deleted: Vec<EventFn<K>>,
    timeout: Vec<TimeoutFn>,
    no_events_yet: Vec<NoEventsYetFn<K>>,
}

impl<K> Default for Handlers<K> {
    fn default() -> Self {
        Self {
            skip: Vec::new(),
            added: Vec::new(),
            modified: Vec::new(),
            deleted: Vec::new(),
            timeout: Vec::new(),
            no_events_yet: Vec::new(),
        }
    }
}

fn boxed_event_fn<K, F, Fut>(f: F) -> EventFn<K>
where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<K>>> + Send + 'static,
{
    Box::new(move |obj| f(obj).boxed())
}

enum Interrupt {
    Stopped,
    ContextDone,
}

/// A watcher that has not been connected yet
pub struct Watcher<K, A> {
    ctx: CancellationToken,
    api: A,
    config: Config,
    stop: CancellationToken,
    handlers: Handlers<K>,
}

impl<K, A> Watcher<K, A>
where
    K: WatchedResource,
    A: ResourceApi<K>,
{
    /// Creates a watcher bound to the context token `ctx`
    pub fn new(ctx: CancellationToken, api: A, config: Config) -> Self {
        Self {
            ctx,
            api,
            config,
            stop: CancellationToken::new(),
            handlers: Handlers::default(),
        }
    }

    /// Ignore objects for which `f` returns true
    ///
    /// An object is skipped if any registered predicate returns true.
    #[must_use]
    pub fn with_skip_fn(mut self, f: impl Fn(&K) -> bool + Send + Sync + 'static) -> Self {
        self.handlers.skip.push(Box::new(f));
        self
    }

    /// Handle `Added` events
    #[must_use]
    pub fn with_on_added_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<K>>> + Send + 'static,
    {
        self.handlers.added.push(boxed_event_fn(f));
        self
    }

    /// Handle `Modified` events
    #[must_use]
    pub fn with_on_modified_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<K>>> + Send + 'static,
    {
        self.handlers.modified.push(boxed_event_fn(f));
        self
    }

    /// Handle `Deleted` events
    #[must_use]
    pub fn with_on_deleted_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<K>>> + Send + 'static,
    {
        self.handlers.deleted.push(boxed_event_fn(f));
        self
    }

    /// Called when the context ends before the watch completes
    #[must_use]
    pub fn with_timeout_fn(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.handlers.timeout.push(Box::new(f));
        self
    }

    /// Called after an inactivity reconciliation that did not complete the watch
    ///
    /// Receives the listed objects that passed the skip predicates, `None` if there were none.
    #[must_use]
    pub fn with_no_events_yet_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Option<Vec<K>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.no_events_yet.push(Box::new(move |list| f(list).boxed()));
        self
    }

    /// A handle that stops the loop
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    /// Establishes the subscription
    ///
    /// # Errors
    ///
    /// [`Error::WatchStartFailed`] if the subscription could not be established.
    pub async fn connect(self, filter: &Filter) -> Result<Connected<K, A>> {
        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        let events = self.api.subscribe(filter).await.map_err(|err| {
            tracing::error!(kind = %K::kind_name(), error = %err, "failed to start watching");
            Error::WatchStartFailed(err)
        })?;
        tracing::debug!(kind = %K::kind_name(), ?filter, "watch connected");
        Ok(Connected {
            watcher: self,
            events,
            filter: filter.clone(),
            deadline,
        })
    }

    /// Connects and waits for completion
    ///
    /// # Errors
    ///
    /// See [`Watcher::connect`] and [`Connected::wait_for_completion`].
    pub async fn start(self, filter: &Filter) -> Result<Option<K>> {
        self.connect(filter).await?.wait_for_completion().await
    }

    fn skips(&self, obj: &K) -> bool {
        self.handlers.skip.iter().any(|skip| skip(obj))
    }

    /// Resolves once the loop has to end early, whatever it is waiting on
    async fn interrupted<D: Future<Output = ()> + Unpin>(&self, deadline: D) -> Interrupt {
        tokio::select! {
            biased;
            () = self.stop.cancelled() => Interrupt::Stopped,
            () = self.ctx.cancelled() => Interrupt::ContextDone,
            () = deadline => Interrupt::ContextDone,
        }
    }

    fn interrupt(&self, why: Interrupt) -> Option<K> {
        match why {
            Interrupt::Stopped => tracing::debug!(kind = %K::kind_name(), "watch stopped"),
            Interrupt::ContextDone => self.timed_out(CONTEXT_DONE),
        }
        None
    }

    fn timed_out(&self, reason: &str) {
        tracing::debug!(kind = %K::kind_name(), reason, "watch ended by context");
        for f in &self.handlers.timeout {
            f(reason);
        }
    }

    async fn dispatch(&self, event: WatchEvent<K>) -> Result<Option<K>> {
        if self.skips(&event.object) {
            tracing::trace!(kind = %K::kind_name(), name = %event.object.name_any(), "skipped event");
            return Ok(None);
        }
        tracing::debug!(
            kind = %K::kind_name(),
            name = %event.object.name_any(),
            event = ?event.type_,
            "dispatching event"
        );
        let handlers = match event.type_ {
            EventType::Added => &self.handlers.added,
            EventType::Modified => &self.handlers.modified,
            EventType::Deleted => &self.handlers.deleted,
        };
        for handler in handlers {
            if let Some(done) = handler(event.object.clone()).await? {
                return Ok(Some(done));
            }
        }
        Ok(None)
    }

    /// Lists the current state once, dispatching terminal snapshots through the usual path
    async fn reconcile(&self, filter: &Filter) -> Result<Option<K>> {
        let items = match self.api.list(filter).await {
            Ok(items) => items,
            Err(err) => {
                tracing::warn!(
                    kind = %K::kind_name(),
                    error = %err,
                    "inactivity list failed, continuing to wait"
                );
                return Ok(None);
            }
        };
        let mut matched = Vec::new();
        for obj in items {
            if self.skips(&obj) {
                continue;
            }
            match classify(Some(&obj)) {
                outcome if outcome.is_terminal() => {
                    tracing::debug!(
                        kind = %K::kind_name(),
                        name = %obj.name_any(),
                        ?outcome,
                        "listed terminal object"
                    );
                    let event = WatchEvent::new(EventType::Modified, obj.clone());
                    if let Some(done) = self.dispatch(event).await? {
                        return Ok(Some(done));
                    }
                }
                Outcome::Unknown => {
                    tracing::debug!(
                        kind = %K::kind_name(),
                        name = %obj.name_any(),
                        "listed object in unknown state"
                    );
                }
                _ => {}
            }
            matched.push(obj);
        }
        let matched = (!matched.is_empty()).then_some(matched);
        for f in &self.handlers.no_events_yet {
            f(matched.clone()).await;
        }
        Ok(None)
    }
}

/// A watcher with an established subscription
pub struct Connected<K, A> {
    watcher: Watcher<K, A>,
    events: EventStream,
    filter: Filter,
    deadline: Option<Instant>,
}

impl<K, A> Connected<K, A>
where
    K: WatchedResource,
    A: ResourceApi<K>,
{
    /// A handle that stops the loop
    pub fn stop_handle(&self) -> StopHandle {
        self.watcher.stop_handle()
    }

    /// Runs the event loop to completion
    ///
    /// Events are handled one at a time in delivery order. A handler that is still pending
    /// when the loop is stopped or the context ends is dropped, so the loop never waits on it.
    /// A handler that completes in the same poll as it stops the loop keeps its result.
    /// Dropping the connection at the end closes the subscription.
    ///
    /// # Errors
    ///
    /// Transport and decode failures, or whatever error a handler returned.
    pub async fn wait_for_completion(self) -> Result<Option<K>> {
        let res = self.run().await;
        match &res {
            Err(err) if err.is_fault() => {
                tracing::error!(kind = %K::kind_name(), error = %err, "watch failed");
            }
            Err(err) => tracing::debug!(kind = %K::kind_name(), outcome = %err, "watch completed"),
            Ok(Some(obj)) => {
                tracing::debug!(kind = %K::kind_name(), name = %obj.name_any(), "watch completed");
            }
            Ok(None) => tracing::debug!(kind = %K::kind_name(), "watch ended without result"),
        }
        res
    }

    async fn run(self) -> Result<Option<K>> {
        let Connected {
            watcher,
            mut events,
            filter,
            deadline,
        } = self;
        let deadline = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => futures::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        let inactivity = sleep(watcher.config.inactivity);
        tokio::pin!(inactivity);
        let mut seen_event = false;
        let mut reconciled = false;

        loop {
            let handled = tokio::select! {
                biased;
                why = watcher.interrupted(&mut deadline) => return Ok(watcher.interrupt(why)),
                () = &mut inactivity, if !seen_event && !reconciled => {
                    reconciled = true;
                    tracing::debug!(kind = %K::kind_name(), "no events yet, reconciling with a list");
                    tokio::select! {
                        biased;
                        res = watcher.reconcile(&filter) => res?,
                        why = watcher.interrupted(&mut deadline) => return Ok(watcher.interrupt(why)),
                    }
                }
                event = events.next() => match event {
                    None => return Err(Error::WatchClosed),
                    Some(Err(err)) => return Err(Error::WatchFailed(err)),
                    Some(Ok(raw)) => {
                        seen_event = true;
                        let event = raw.decode::<K>()?;
                        tokio::select! {
                            biased;
                            res = watcher.dispatch(event) => res?,
                            why = watcher.interrupted(&mut deadline) => return Ok(watcher.interrupt(why)),
                        }
                    }
                },
            };
            if let Some(done) = handled {
                return Ok(Some(done));
            }
        }
    }
}

/// Skip predicate for objects not named `name`
pub fn skip_unless_named<K: WatchedResource>(
    name: impl Into<String>,
) -> impl Fn(&K) -> bool + Send + Sync + 'static {
    let name = name.into();
    move |obj: &K| obj.meta().name.as_deref() != Some(name.as_str())
}

/// Skip predicate for objects without the label `key=value`
pub fn skip_unless_labeled<K: WatchedResource>(
    key: impl Into<String>,
    value: impl Into<String>,
) -> impl Fn(&K) -> bool + Send + Sync + 'static {
    let (key, value) = (key.into(), value.into());
    move |obj: &K| obj.labels().get(&key) != Some(&value)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::fixtures::{self, exited, started};
    use k8s_openapi::api::core::v1::Pod;
    use parking_lot::Mutex;
    use shp_client::testing::MockApi;

    /// Completes on terminal pods, records every name it sees
    fn terminal_watcher(
        api: MockApi<Pod>,
        ctx: CancellationToken,
        seen: Arc<Mutex<Vec<String>>>,
    ) -> Watcher<Pod, MockApi<Pod>> {
        let on_event = move |pod: Pod| {
            let seen = seen.clone();
            async move {
                seen.lock().push(pod.name_any());
                Ok(classify(Some(&pod)).is_terminal().then_some(pod))
            }
        };
        Watcher::new(ctx, api, Config::default().inactivity(Duration::from_secs(3600)))
            .with_on_added_fn(on_event.clone())
            .with_on_modified_fn(on_event)
    }

    #[tokio::test]
    async fn returns_the_terminal_snapshot_and_nothing_after() {
        let api = MockApi::<Pod>::new();
        let tx = api.subscription();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let watcher = terminal_watcher(api, CancellationToken::new(), seen.clone());

        tx.added(fixtures::pod("p1", "Pending", fixtures::waiting()));
        tx.modified(fixtures::pod("p2", "Running", started()));
        tx.modified(fixtures::pod("p3", "Succeeded", exited(0)));
        tx.modified(fixtures::pod("p4", "Succeeded", exited(0)));

        let done = watcher.start(&Filter::default()).await.unwrap().unwrap();
        assert_eq!(done.name_any(), "p3");
        assert_eq!(*seen.lock(), vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn skipped_objects_never_reach_handlers() {
        let api = MockApi::<Pod>::new();
        let tx = api.subscription();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let watcher = terminal_watcher(api, CancellationToken::new(), seen.clone())
            .with_skip_fn(skip_unless_named::<Pod>("mine"));

        tx.modified(fixtures::pod("other", "Succeeded", exited(0)));
        tx.modified(fixtures::pod("mine", "Failed", exited(1)));

        let done = watcher.start(&Filter::default()).await.unwrap().unwrap();
        assert_eq!(done.name_any(), "mine");
        assert_eq!(*seen.lock(), vec!["mine"]);
    }

    #[tokio::test]
    async fn label_predicate_skips_foreign_owners() {
        let skip = skip_unless_labeled::<Pod>("buildrun.shipwright.io/name", "br");
        assert!(!skip(&fixtures::pod("p", "Running", started())));
        assert!(skip(&fixtures::with_owner(fixtures::pod("p", "Running", started()), "other")));
    }

    #[tokio::test]
    async fn deleted_events_go_to_the_deleted_handler() {
        let api = MockApi::<Pod>::new();
        let tx = api.subscription();
        let watcher = Watcher::new(CancellationToken::new(), api, Config::default())
            .with_on_modified_fn(|_pod: Pod| async { Ok(None) })
            .with_on_deleted_fn(|pod: Pod| async move { Ok(Some(pod)) });
        tx.modified(fixtures::pod("p", "Running", started()));
        tx.deleted(fixtures::pod("p", "Running", started()));
        assert!(watcher.start(&Filter::default()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_ends_the_loop() {
        let api = MockApi::<Pod>::new();
        let _tx = api.subscription();
        let watcher = terminal_watcher(api, CancellationToken::new(), Default::default());
        let stop = watcher.stop_handle();
        let connected = watcher.connect(&Filter::default()).await.unwrap();
        let waiting = tokio::spawn(connected.wait_for_completion());

        let stoppers: Vec<_> = (0..4)
            .map(|_| {
                let stop = stop.clone();
                tokio::spawn(async move { stop.stop() })
            })
            .collect();
        for s in stoppers {
            s.await.unwrap();
        }
        stop.stop();
        assert!(stop.is_stopped());
        assert!(waiting.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn handler_can_stop_its_own_watcher() {
        let api = MockApi::<Pod>::new();
        let tx = api.subscription();
        let watcher = Watcher::new(CancellationToken::new(), api, Config::default());
        let stop = watcher.stop_handle();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let watcher = watcher.with_on_modified_fn(move |_pod: Pod| {
            counted.fetch_add(1, Ordering::SeqCst);
            stop.stop();
            async { Ok(None) }
        });
        tx.modified(fixtures::pod("p", "Running", started()));
        tx.modified(fixtures::pod("p", "Running", started()));
        assert!(watcher.start(&Filter::default()).await.unwrap().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_context_returns_none_and_calls_timeout() {
        let api = MockApi::<Pod>::new();
        let _tx = api.subscription();
        let ctx = CancellationToken::new();
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let recorded = reasons.clone();
        let watcher = terminal_watcher(api, ctx.clone(), Default::default())
            .with_timeout_fn(move |reason| recorded.lock().push(reason.to_string()));
        let waiting = tokio::spawn(async move { watcher.start(&Filter::default()).await });
        tokio::task::yield_now().await;
        ctx.cancel();
        assert!(waiting.await.unwrap().unwrap().is_none());
        assert_eq!(*reasons.lock(), vec![CONTEXT_DONE]);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_behaves_like_cancellation() {
        let api = MockApi::<Pod>::new();
        let _tx = api.subscription();
        let fired = Arc::new(AtomicUsize::new(0));
        let counted = fired.clone();
        let watcher = Watcher::new(
            CancellationToken::new(),
            api,
            Config::default().timeout(Duration::from_secs(30)).inactivity(Duration::from_secs(3600)),
        )
        .with_on_modified_fn(|_pod: Pod| async { Ok(None) })
        .with_timeout_fn(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        let start = Instant::now();
        assert!(watcher.start(&Filter::default()).await.unwrap().is_none());
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_reconciles_a_finished_object() {
        let api = MockApi::<Pod>::new();
        let _tx = api.subscription();
        api.set_list(vec![
            fixtures::pod("other", "Succeeded", exited(0)),
            fixtures::pod("mine", "Succeeded", exited(0)),
        ]);
        let no_events = Arc::new(AtomicUsize::new(0));
        let counted = no_events.clone();
        let watcher = Watcher::new(CancellationToken::new(), api.clone(), Config::default())
            .with_skip_fn(skip_unless_named::<Pod>("mine"))
            .with_on_modified_fn(|pod: Pod| async move {
                Ok(classify(Some(&pod)).is_terminal().then_some(pod))
            })
            .with_no_events_yet_fn(move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                async {}
            });
        let done = watcher.start(&Filter::default()).await.unwrap().unwrap();
        assert_eq!(done.name_any(), "mine");
        assert_eq!(api.list_calls(), 1);
        assert_eq!(no_events.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_reconciliation_keeps_waiting() {
        let api = MockApi::<Pod>::new();
        let tx = api.subscription();
        api.set_list(vec![fixtures::pod("other", "Running", started())]);
        let lists = Arc::new(Mutex::new(Vec::new()));
        let recorded = lists.clone();
        let watcher = Watcher::new(CancellationToken::new(), api.clone(), Config::default())
            .with_skip_fn(skip_unless_named::<Pod>("mine"))
            .with_on_modified_fn(|pod: Pod| async move {
                Ok(classify(Some(&pod)).is_terminal().then_some(pod))
            })
            .with_no_events_yet_fn(move |list: Option<Vec<Pod>>| {
                recorded.lock().push(list.map(|l| l.len()));
                async {}
            });
        let waiting = tokio::spawn(async move { watcher.start(&Filter::default()).await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiting.is_finished());
        assert_eq!(*lists.lock(), vec![None]);
        assert_eq!(api.list_calls(), 1);

        tx.modified(fixtures::pod("mine", "Succeeded", exited(0)));
        let done = waiting.await.unwrap().unwrap().unwrap();
        assert_eq!(done.name_any(), "mine");
    }

    #[tokio::test(start_paused = true)]
    async fn list_failure_is_not_fatal() {
        let api = MockApi::<Pod>::new();
        let tx = api.subscription();
        api.fail_list("forbidden");
        let watcher = terminal_watcher(api.clone(), CancellationToken::new(), Default::default());
        let watcher = Watcher {
            config: Config::default(),
            ..watcher
        };
        let waiting = tokio::spawn(async move { watcher.start(&Filter::default()).await });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(api.list_calls(), 1);
        tx.added(fixtures::pod("p", "Failed", exited(1)));
        assert!(waiting.await.unwrap().unwrap().is_some());
    }

    #[tokio::test]
    async fn undecodable_payload_is_fatal() {
        let api = MockApi::<Pod>::new();
        let tx = api.subscription();
        let watcher = terminal_watcher(api, CancellationToken::new(), Default::default());
        tx.send(shp_core::RawEvent::dynamic(
            EventType::Modified,
            serde_json::json!({ "kind": "Status", "message": "expired" }),
        ));
        let err = watcher.start(&Filter::default()).await.unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::Status { .. })));
        assert!(err.is_fault());
    }

    #[tokio::test]
    async fn closed_or_failed_streams_are_transport_errors() {
        let api = MockApi::<Pod>::new();
        drop(api.subscription());
        let tx = api.subscription();
        api.fail_subscribe("connection refused");

        let watcher = terminal_watcher(api.clone(), CancellationToken::new(), Default::default());
        assert!(matches!(watcher.start(&Filter::default()).await, Err(Error::WatchClosed)));

        tx.fail("reset by peer");
        let watcher = terminal_watcher(api.clone(), CancellationToken::new(), Default::default());
        assert!(matches!(watcher.start(&Filter::default()).await, Err(Error::WatchFailed(_))));

        let watcher = terminal_watcher(api, CancellationToken::new(), Default::default());
        assert!(matches!(
            watcher.connect(&Filter::default()).await,
            Err(Error::WatchStartFailed(_))
        ));
    }

    #[tokio::test]
    async fn handler_errors_end_the_loop() {
        let api = MockApi::<Pod>::new();
        let tx = api.subscription();
        let watcher = Watcher::new(CancellationToken::new(), api, Config::default())
            .with_on_added_fn(|pod: Pod| async move {
                Err(Error::Terminal(Terminal::PodDeleted { name: pod.name_any() }))
            });
        tx.added(fixtures::pod("p", "Failed", exited(1)));
        let err = watcher.start(&Filter::default()).await.unwrap_err();
        assert!(!err.is_fault());
        assert_eq!(err.terminal(), Some(&Terminal::PodDeleted { name: "p".into() }));
    }

    #[tokio::test]
    async fn handler_failures_surface_as_handler_errors() {
        let api = MockApi::<Pod>::new();
        let tx = api.subscription();
        let watcher = Watcher::new(CancellationToken::new(), api, Config::default())
            .with_on_added_fn(|_pod: Pod| async { Err(Error::Handler("no owner label".into())) });
        tx.added(fixtures::pod("p", "Running", started()));
        let err = watcher.start(&Filter::default()).await.unwrap_err();
        assert!(err.is_fault());
        assert_eq!(err.to_string(), "handler failed: no owner label");
    }

    /// A watcher whose modified handler never completes
    fn stuck_watcher(
        api: MockApi<Pod>,
        ctx: CancellationToken,
        entered: Arc<AtomicUsize>,
    ) -> Watcher<Pod, MockApi<Pod>> {
        Watcher::new(ctx, api, Config::default().inactivity(Duration::from_secs(3600)))
            .with_on_modified_fn(move |_pod: Pod| {
                entered.fetch_add(1, Ordering::SeqCst);
                futures::future::pending()
            })
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_does_not_wait_for_a_pending_handler() {
        let api = MockApi::<Pod>::new();
        let tx = api.subscription();
        let ctx = CancellationToken::new();
        let entered = Arc::new(AtomicUsize::new(0));
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let recorded = reasons.clone();
        let watcher = stuck_watcher(api, ctx.clone(), entered.clone())
            .with_timeout_fn(move |reason| recorded.lock().push(reason.to_string()));
        let waiting = tokio::spawn(async move { watcher.start(&Filter::default()).await });

        tx.modified(fixtures::pod("p", "Failed", exited(1)));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(entered.load(Ordering::SeqCst), 1);
        assert!(!waiting.is_finished());

        let cancelled_at = Instant::now();
        ctx.cancel();
        assert!(waiting.await.unwrap().unwrap().is_none());
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
        assert_eq!(*reasons.lock(), vec![CONTEXT_DONE]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_does_not_wait_for_a_pending_handler() {
        let api = MockApi::<Pod>::new();
        let tx = api.subscription();
        let entered = Arc::new(AtomicUsize::new(0));
        let timeouts = Arc::new(AtomicUsize::new(0));
        let counted = timeouts.clone();
        let watcher = stuck_watcher(api, CancellationToken::new(), entered.clone()).with_timeout_fn(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        let stop = watcher.stop_handle();
        let waiting = tokio::spawn(async move { watcher.start(&Filter::default()).await });

        tx.modified(fixtures::pod("p", "Running", started()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(entered.load(Ordering::SeqCst), 1);

        stop.stop();
        assert!(waiting.await.unwrap().unwrap().is_none());
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);
    }
}
