//! Waits for objects to reach a terminal state
use kube::core::ResourceExt;
use shp_client::ResourceApi;
use shp_core::{classify, outcome::terminal_result_of, Filter, Terminal, WatchedResource};
use tokio_util::sync::CancellationToken;

use crate::watcher::{skip_unless_named, Config, Result, Watcher};

/// Watches the object `name` until it reaches a terminal state
///
/// Returns the terminal snapshot, which may describe a failure or a cancellation, see
/// [`into_outcome`]. Returns `None` if `ctx` ends first.
///
/// # Errors
///
/// Watch faults, and [`Terminal::Deleted`] if the object is deleted while being watched.
///
/// # Usage
///
/// ```ignore
/// use shp_client::KubeClient;
/// use shp_core::BuildRun;
/// use shp_runtime::{wait::{await_terminal, into_outcome}, watcher::Config};
/// use tokio_util::sync::CancellationToken;
/// # async fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
/// let client = KubeClient::try_default().await?;
/// let ctx = CancellationToken::new();
/// let done = await_terminal::<BuildRun, _>(ctx, client, "br-1", Config::default()).await;
/// match into_outcome(done)? {
///     Some(br) => println!("{:?} succeeded", br.metadata.name),
///     None => println!("gave up waiting"),
/// }
/// # Ok(())
/// # }
/// ```
pub async fn await_terminal<K, A>(
    ctx: CancellationToken,
    api: A,
    name: &str,
    config: Config,
) -> Result<Option<K>>
where
    K: WatchedResource,
    A: ResourceApi<K>,
{
    let settled = |obj: K| async move { Ok(classify(Some(&obj)).is_terminal().then_some(obj)) };
    Watcher::new(ctx, api, config)
        .with_skip_fn(skip_unless_named::<K>(name))
        .with_on_added_fn(settled)
        .with_on_modified_fn(settled)
        .with_on_deleted_fn(|obj: K| async move {
            Err(Terminal::Deleted {
                kind: K::kind_name(),
                name: obj.name_any(),
            }
            .into())
        })
        .start(&Filter::named(name))
        .await
}

/// Turns a terminal snapshot that is not a success into its [`Terminal`] error
///
/// # Errors
///
/// The error that was passed in, or the [`Terminal`] outcome of the snapshot.
pub fn into_outcome<K: WatchedResource>(res: Result<Option<K>>) -> Result<Option<K>> {
    match res? {
        Some(obj) => {
            terminal_result_of(&obj)?;
            Ok(Some(obj))
        }
        None => Ok(None),
    }
}
