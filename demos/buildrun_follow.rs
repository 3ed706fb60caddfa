//! Follows the logs of a BuildRun until it completes
//!
//! Usage: `cargo run --example buildrun_follow -- <buildrun> [--namespace ns] [--timeout 600]`
use std::time::Duration;

use shp::{
    client::KubeClient,
    runtime::{follower, watcher, Follower, LogSink},
    BuildRun, Filter,
};
use tokio::signal::ctrl_c;
use tokio_util::sync::CancellationToken;
use tracing::*;

#[derive(clap::Parser)]
struct Opts {
    /// Name of the BuildRun to follow
    name: String,
    #[clap(long, short)]
    namespace: Option<String>,
    /// Give up after this many seconds
    #[clap(long)]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shp_runtime=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Opts {
        name,
        namespace,
        timeout,
    } = clap::Parser::parse();

    let mut client = KubeClient::try_default().await?;
    if let Some(ns) = namespace {
        client = client.within(&ns);
    }
    info!(%name, namespace = client.namespace(), "following build run");

    let ctx = CancellationToken::new();
    let interrupted = ctx.clone();
    tokio::spawn(async move {
        if ctrl_c().await.is_ok() {
            interrupted.cancel();
        }
    });

    let mut watch = watcher::Config::default();
    if let Some(secs) = timeout {
        watch = watch.timeout(Duration::from_secs(secs));
    }
    let follower = Follower::<_, _, _, BuildRun>::new(
        ctx,
        client.clone(),
        client.clone(),
        client,
        LogSink::stdout(),
        follower::Config::default().watcher(watch),
    );
    follower.set_target_name(&name);

    match follower.start(&Filter::for_build_run(&name)).await {
        Ok(Some(pod)) => info!(pod = ?pod.metadata.name, "build run succeeded"),
        Ok(None) => warn!("stopped before the build run completed"),
        Err(err) if err.terminal().is_some() => {
            // already reported on stdout by the follower
            std::process::exit(1);
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}
