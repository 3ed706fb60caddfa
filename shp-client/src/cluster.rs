use futures::{future, io::AsyncBufReadExt, pin_mut, StreamExt, TryStreamExt};
use k8s_openapi::{api::core::v1::Pod, NamespaceResourceScope};
use kube::{
    api::{ApiResource, DynamicObject, ListParams, LogParams, WatchEvent, WatchParams},
    core::Resource,
    Api, Client,
};
use shp_core::{EventType, Filter, ObjectRef, RawEvent, WatchedResource};

use crate::{
    api::{EventStream, LogApi, LogStream, ResourceApi},
    Error, Result,
};

/// [`ResourceApi`] and [`LogApi`] backed by a [`kube::Client`], scoped to one namespace
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    namespace: String,
}

impl KubeClient {
    /// Wraps an existing client
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Infers the configuration from the environment (kubeconfig or in-cluster) and uses the
    /// default namespace it names
    ///
    /// # Errors
    ///
    /// Fails if no usable configuration could be found.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.map_err(Error::Api)?;
        let namespace = client.default_namespace().to_string();
        Ok(Self::new(client, namespace))
    }

    /// A copy scoped to another namespace
    #[must_use]
    pub fn within(&self, namespace: &str) -> Self {
        Self::new(self.client.clone(), namespace)
    }

    /// The namespace this client is scoped to
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn list_params(filter: &Filter) -> ListParams {
    let mut lp = ListParams::default();
    if let Some(labels) = &filter.label_selector {
        lp = lp.labels(labels);
    }
    if let Some(fields) = &filter.field_selector {
        lp = lp.fields(fields);
    }
    lp
}

fn watch_params(filter: &Filter) -> WatchParams {
    let mut wp = WatchParams::default();
    if let Some(labels) = &filter.label_selector {
        wp = wp.labels(labels);
    }
    if let Some(fields) = &filter.field_selector {
        wp = wp.fields(fields);
    }
    if let Some(timeout) = filter.timeout {
        wp = wp.timeout(timeout);
    }
    wp
}

fn into_raw(event: kube::Result<WatchEvent<DynamicObject>>) -> Option<Result<RawEvent>> {
    match event {
        Ok(WatchEvent::Added(obj)) => Some(Ok(RawEvent::typed(EventType::Added, obj))),
        Ok(WatchEvent::Modified(obj)) => Some(Ok(RawEvent::typed(EventType::Modified, obj))),
        Ok(WatchEvent::Deleted(obj)) => Some(Ok(RawEvent::typed(EventType::Deleted, obj))),
        Ok(WatchEvent::Bookmark(_)) => None,
        Ok(WatchEvent::Error(err)) => Some(Err(Error::Watch {
            code: err.code,
            message: err.message,
        })),
        Err(err) => Some(Err(Error::Api(err))),
    }
}

impl<K> ResourceApi<K> for KubeClient
where
    K: WatchedResource + Resource<Scope = NamespaceResourceScope>,
{
    /// Watches through the generic document API, the events are decoded by the watcher
    async fn subscribe(&self, filter: &Filter) -> Result<EventStream> {
        let ar = ApiResource::erase::<K>(&());
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), &self.namespace, &ar);
        let stream = api.watch(&watch_params(filter), "0").await.map_err(Error::Api)?;
        tracing::debug!(kind = %ar.kind, namespace = %self.namespace, "subscription established");
        Ok(stream.filter_map(|ev| future::ready(into_raw(ev))).boxed())
    }

    async fn list(&self, filter: &Filter) -> Result<Vec<K>> {
        let list = self.api::<K>().list(&list_params(filter)).await.map_err(Error::Api)?;
        Ok(list.items)
    }

    async fn get(&self, name: &str) -> Result<Option<K>> {
        self.api::<K>().get_opt(name).await.map_err(Error::Api)
    }
}

impl LogApi for KubeClient {
    /// Connection errors surface as the first item of the stream
    async fn logs(&self, pod: &ObjectRef, container: &str, follow: bool) -> Result<LogStream> {
        let namespace = pod.namespace.clone().unwrap_or_else(|| self.namespace.clone());
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let name = pod.name.clone();
        let lp = LogParams {
            container: Some(container.to_string()),
            follow,
            ..LogParams::default()
        };
        let lines = async_stream::try_stream! {
            let reader = api.log_stream(&name, &lp).await.map_err(Error::Api)?;
            let lines = reader.lines();
            pin_mut!(lines);
            while let Some(line) = lines.try_next().await.map_err(Error::Read)? {
                yield line;
            }
        };
        Ok(lines.boxed())
    }
}
