use std::future::Future;

use futures::{stream::BoxStream, TryStreamExt};
use shp_core::{Filter, ObjectRef, RawEvent, WatchedResource};

use crate::Result;

/// Events delivered by one subscription
///
/// Dropping the stream closes the subscription.
pub type EventStream = BoxStream<'static, Result<RawEvent>>;

/// Log lines of one container
pub type LogStream = BoxStream<'static, Result<String>>;

/// Access to resources of kind `K`
pub trait ResourceApi<K: WatchedResource>: Clone + Send + Sync + 'static {
    /// Opens a subscription delivering change events for the objects matching `filter`
    fn subscribe(&self, filter: &Filter) -> impl Future<Output = Result<EventStream>> + Send;

    /// Point-in-time read of the objects matching `filter`
    fn list(&self, filter: &Filter) -> impl Future<Output = Result<Vec<K>>> + Send;

    /// Reads one object, `None` if it does not exist
    fn get(&self, name: &str) -> impl Future<Output = Result<Option<K>>> + Send;
}

/// Access to container logs
pub trait LogApi: Clone + Send + Sync + 'static {
    /// Streams the log lines of `container` in `pod`
    ///
    /// With `follow` the stream keeps delivering new lines until the container stops,
    /// otherwise it ends after the lines available right now.
    fn logs(
        &self,
        pod: &ObjectRef,
        container: &str,
        follow: bool,
    ) -> impl Future<Output = Result<LogStream>> + Send;

    /// Collects whatever logs are currently available into one string
    fn fetch_logs(&self, pod: &ObjectRef, container: &str) -> impl Future<Output = Result<String>> + Send {
        async move {
            let lines: Vec<String> = self.logs(pod, container, false).await?.try_collect().await?;
            Ok(lines.join("\n"))
        }
    }
}
