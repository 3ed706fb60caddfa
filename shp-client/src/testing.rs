//! Scripted in-memory collaborators
//!
//! [`MockApi`] hands out subscriptions whose events the test pushes through an
//! [`EventSender`], and answers lists and gets from canned data. [`MockLogs`] serves canned
//! log lines and records every request it sees.
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use futures::{channel::mpsc, stream, StreamExt};
use parking_lot::Mutex;
use shp_core::{EventType, Filter, ObjectRef, RawEvent, WatchedResource};

use crate::{
    api::{EventStream, LogApi, LogStream, ResourceApi},
    Error, Result,
};

/// Pushes events into a subscription handed out by [`MockApi`]
///
/// Dropping the sender ends the subscription stream.
pub struct EventSender {
    tx: mpsc::UnboundedSender<Result<RawEvent>>,
}

impl EventSender {
    /// Sends a raw event, returns false if the subscriber is gone
    pub fn send(&self, event: RawEvent) -> bool {
        self.tx.unbounded_send(Ok(event)).is_ok()
    }

    /// Sends an `Added` event carrying `obj` typed
    pub fn added<K: Send + 'static>(&self, obj: K) -> bool {
        self.send(RawEvent::typed(EventType::Added, obj))
    }

    /// Sends a `Modified` event carrying `obj` typed
    pub fn modified<K: Send + 'static>(&self, obj: K) -> bool {
        self.send(RawEvent::typed(EventType::Modified, obj))
    }

    /// Sends a `Deleted` event carrying `obj` typed
    pub fn deleted<K: Send + 'static>(&self, obj: K) -> bool {
        self.send(RawEvent::typed(EventType::Deleted, obj))
    }

    /// Delivers a stream error
    pub fn fail(&self, message: &str) -> bool {
        self.tx.unbounded_send(Err(Error::Injected(message.to_string()))).is_ok()
    }
}

struct ApiState<K> {
    subscriptions: VecDeque<std::result::Result<mpsc::UnboundedReceiver<Result<RawEvent>>, String>>,
    list: std::result::Result<Vec<K>, String>,
    objects: HashMap<String, VecDeque<Option<K>>>,
    get_error: Option<String>,
    filters: Vec<Filter>,
    list_calls: usize,
    get_calls: usize,
}

/// Scripted [`ResourceApi`]
///
/// Subscriptions are served in the order they were scripted. Once the script is exhausted a
/// subscription never delivers anything.
pub struct MockApi<K> {
    state: Arc<Mutex<ApiState<K>>>,
}

impl<K> Clone for MockApi<K> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<K> Default for MockApi<K> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(ApiState {
                subscriptions: VecDeque::new(),
                list: Ok(Vec::new()),
                objects: HashMap::new(),
                get_error: None,
                filters: Vec::new(),
                list_calls: 0,
                get_calls: 0,
            })),
        }
    }
}

impl<K> MockApi<K> {
    /// An api with nothing scripted
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next subscription and returns the sender feeding it
    pub fn subscription(&self) -> EventSender {
        let (tx, rx) = mpsc::unbounded();
        self.state.lock().subscriptions.push_back(Ok(rx));
        EventSender { tx }
    }

    /// Scripts the next subscription attempt to fail
    pub fn fail_subscribe(&self, message: &str) {
        self.state.lock().subscriptions.push_back(Err(message.to_string()));
    }

    /// Sets what `list` returns
    pub fn set_list(&self, items: Vec<K>) {
        self.state.lock().list = Ok(items);
    }

    /// Makes `list` fail
    pub fn fail_list(&self, message: &str) {
        self.state.lock().list = Err(message.to_string());
    }

    /// Sets what `get` returns for `name`, `None` meaning not found
    pub fn set_object(&self, name: &str, obj: Option<K>) {
        self.set_objects(name, vec![obj]);
    }

    /// Scripts successive `get` answers for `name`, the last one repeats
    pub fn set_objects(&self, name: &str, objs: Vec<Option<K>>) {
        self.state.lock().objects.insert(name.to_string(), objs.into());
    }

    /// Makes `get` fail
    pub fn fail_get(&self, message: &str) {
        self.state.lock().get_error = Some(message.to_string());
    }

    /// Number of `list` calls so far
    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    /// Number of `get` calls so far
    pub fn get_calls(&self) -> usize {
        self.state.lock().get_calls
    }

    /// Filters passed to `subscribe`, in call order
    pub fn filters(&self) -> Vec<Filter> {
        self.state.lock().filters.clone()
    }
}

impl<K: WatchedResource> ResourceApi<K> for MockApi<K> {
    async fn subscribe(&self, filter: &Filter) -> Result<EventStream> {
        let mut state = self.state.lock();
        state.filters.push(filter.clone());
        match state.subscriptions.pop_front() {
            Some(Ok(rx)) => Ok(rx.boxed()),
            Some(Err(message)) => Err(Error::Injected(message)),
            None => Ok(stream::pending().boxed()),
        }
    }

    async fn list(&self, _filter: &Filter) -> Result<Vec<K>> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        state.list.clone().map_err(Error::Injected)
    }

    async fn get(&self, name: &str) -> Result<Option<K>> {
        let mut state = self.state.lock();
        state.get_calls += 1;
        if let Some(message) = &state.get_error {
            return Err(Error::Injected(message.clone()));
        }
        let Some(answers) = state.objects.get_mut(name) else {
            return Ok(None);
        };
        if answers.len() > 1 {
            Ok(answers.pop_front().flatten())
        } else {
            Ok(answers.front().cloned().flatten())
        }
    }
}

/// A log request seen by [`MockLogs`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogCall {
    /// Pod name
    pub pod: String,
    /// Container name
    pub container: String,
    /// Whether the caller asked to follow
    pub follow: bool,
}

#[derive(Default)]
struct LogState {
    lines: HashMap<(String, String), Vec<String>>,
    failing: HashMap<(String, String), String>,
    calls: Vec<LogCall>,
}

/// Scripted [`LogApi`]
///
/// Followed streams deliver the canned lines and then stay open until dropped.
#[derive(Clone, Default)]
pub struct MockLogs {
    state: Arc<Mutex<LogState>>,
}

impl MockLogs {
    /// Logs with nothing scripted, every container is empty
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lines of `container` in `pod`
    pub fn set_lines(&self, pod: &str, container: &str, lines: &[&str]) {
        self.state.lock().lines.insert(
            (pod.to_string(), container.to_string()),
            lines.iter().map(|l| l.to_string()).collect(),
        );
    }

    /// Makes requests for `container` in `pod` fail
    pub fn fail(&self, pod: &str, container: &str, message: &str) {
        self.state
            .lock()
            .failing
            .insert((pod.to_string(), container.to_string()), message.to_string());
    }

    /// Requests seen so far, in call order
    pub fn calls(&self) -> Vec<LogCall> {
        self.state.lock().calls.clone()
    }

    /// Number of requests for `container` with the given mode
    pub fn count(&self, container: &str, follow: bool) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.container == container && c.follow == follow)
            .count()
    }
}

impl LogApi for MockLogs {
    async fn logs(&self, pod: &ObjectRef, container: &str, follow: bool) -> Result<LogStream> {
        let mut state = self.state.lock();
        state.calls.push(LogCall {
            pod: pod.name.clone(),
            container: container.to_string(),
            follow,
        });
        let key = (pod.name.clone(), container.to_string());
        if let Some(message) = state.failing.get(&key) {
            return Err(Error::Injected(message.clone()));
        }
        let lines = state.lines.get(&key).cloned().unwrap_or_default();
        let canned = stream::iter(lines.into_iter().map(Ok));
        if follow {
            Ok(canned.chain(stream::pending()).boxed())
        } else {
            Ok(canned.boxed())
        }
    }
}
