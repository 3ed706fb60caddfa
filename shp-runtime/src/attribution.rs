//! Bounded lookup of the resource that owns a failed pod
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use shp_client::ResourceApi;
use shp_core::{classify, WatchedResource};
use thiserror::Error;

/// What the owner lookup found
#[derive(Clone, Debug)]
pub enum Attribution<K> {
    /// The owner in a terminal state
    Found(K),
    /// The owner no longer exists
    Gone,
    /// The owner did not settle within the bound, or could not be read
    TimedOut,
}

#[derive(Error, Debug)]
enum Unsettled {
    #[error("not in a terminal state yet")]
    Pending,
    #[error("lookup failed: {0}")]
    Unreachable(#[source] shp_client::Error),
}

/// Polls `name` every `interval` until it is gone or terminal, giving up after `timeout`
///
/// A pod can fail before its owner records why, so the owner is given some time to catch
/// up. Lookup errors are retried like a non-terminal owner.
pub async fn attribute_failure<K, A>(
    api: &A,
    name: &str,
    interval: Duration,
    timeout: Duration,
) -> Attribution<K>
where
    K: WatchedResource,
    A: ResourceApi<K>,
{
    let probe = || async move {
        match api.get(name).await {
            Ok(None) => Ok(Attribution::Gone),
            Ok(Some(obj)) if classify(Some(&obj)).is_terminal() => Ok(Attribution::Found(obj)),
            Ok(Some(_)) => Err(Unsettled::Pending),
            Err(err) => Err(Unsettled::Unreachable(err)),
        }
    };
    let attempts = usize::try_from(timeout.as_millis() / interval.as_millis().max(1))
        .unwrap_or(usize::MAX)
        .saturating_add(1);
    let polling = probe
        .retry(ConstantBuilder::default().with_delay(interval).with_max_times(attempts))
        .sleep(tokio::time::sleep)
        .notify(|err: &Unsettled, after: Duration| {
            let kind = K::kind_name();
            tracing::trace!(%kind, name, error = %err, ?after, "owner not settled, retrying");
        });
    match tokio::time::timeout(timeout, polling).await {
        Ok(Ok(found)) => found,
        Ok(Err(err)) => {
            tracing::debug!(kind = %K::kind_name(), name, error = %err, "gave up attributing failure");
            Attribution::TimedOut
        }
        Err(_) => {
            tracing::debug!(kind = %K::kind_name(), name, ?timeout, "gave up attributing failure");
            Attribution::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::build_run_condition;
    use shp_client::testing::MockApi;
    use shp_core::BuildRun;
    use tokio::time::Instant;

    const SECOND: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn waits_for_the_owner_to_settle() {
        let api = MockApi::<BuildRun>::new();
        api.set_objects("br", vec![
            Some(build_run_condition("br", "Unknown", "Running")),
            Some(build_run_condition("br", "Unknown", "Running")),
            Some(build_run_condition("br", "False", "BuildRunCanceled")),
        ]);
        let found = attribute_failure(&api, "br", SECOND, 15 * SECOND).await;
        let Attribution::Found(br) = found else {
            panic!("expected the owner");
        };
        assert!(br.spec.state.is_none());
        assert_eq!(api.get_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_owner_is_gone_at_once() {
        let api = MockApi::<BuildRun>::new();
        assert!(matches!(
            attribute_failure(&api, "br", SECOND, 15 * SECOND).await,
            Attribution::Gone
        ));
        assert_eq!(api.get_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_bound() {
        let api = MockApi::<BuildRun>::new();
        api.set_object("br", Some(build_run_condition("br", "Unknown", "Running")));
        let start = Instant::now();
        assert!(matches!(
            attribute_failure(&api, "br", SECOND, 15 * SECOND).await,
            Attribution::TimedOut
        ));
        assert!(start.elapsed() <= 16 * SECOND);
        assert!(api.get_calls() >= 15);
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_errors_are_retried_until_the_bound() {
        let api = MockApi::<BuildRun>::new();
        api.fail_get("connection refused");
        assert!(matches!(
            attribute_failure(&api, "br", SECOND, 3 * SECOND).await,
            Attribution::TimedOut
        ));
        assert!(api.get_calls() > 1);
    }
}
