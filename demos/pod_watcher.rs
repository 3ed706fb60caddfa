//! Prints every event of the pods matching a label selector until one of them finishes
use k8s_openapi::api::core::v1::Pod;
use shp::{
    classify,
    client::KubeClient,
    core::ObjectRef,
    runtime::{watcher, Watcher},
    Filter, WatchedResource,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

#[derive(clap::Parser)]
struct Opts {
    #[clap(long, short = 'l')]
    selector: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let Opts { selector } = clap::Parser::parse();
    let client = KubeClient::try_default().await?;

    let mut filter = Filter::default();
    if let Some(sel) = &selector {
        filter = filter.labels(sel);
    }

    let report = |pod: Pod| async move {
        let outcome = classify(Some(&pod));
        info!(pod = %ObjectRef::from_obj(&pod), phase = ?pod.phase(), ?outcome, "event");
        Ok(outcome.is_terminal().then_some(pod))
    };
    let done = Watcher::new(CancellationToken::new(), client, watcher::Config::default())
        .with_on_added_fn(report)
        .with_on_modified_fn(report)
        .with_on_deleted_fn(|pod: Pod| async move {
            info!(pod = %ObjectRef::from_obj(&pod), "deleted");
            Ok(None)
        })
        .with_no_events_yet_fn(|pods: Option<Vec<Pod>>| async move {
            info!(existing = pods.map_or(0, |p| p.len()), "nothing happened yet");
        })
        .start(&filter)
        .await?;

    if let Some(pod) = done {
        info!(pod = %ObjectRef::from_obj(&pod), "finished");
    }
    Ok(())
}
