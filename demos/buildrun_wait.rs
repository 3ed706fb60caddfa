//! Waits for a BuildRun to finish without following its logs
use shp::{
    client::KubeClient,
    runtime::wait::{await_terminal, into_outcome},
    BuildRun,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let client = KubeClient::try_default().await?;
    let name = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("Usage: buildrun_wait <buildrun>"))?;

    let ctx = CancellationToken::new();
    let done = await_terminal::<BuildRun, _>(ctx, client, &name, Default::default()).await;
    match into_outcome(done)? {
        Some(br) => info!(name = ?br.metadata.name, "succeeded"),
        None => warn!("stopped waiting"),
    }
    Ok(())
}
