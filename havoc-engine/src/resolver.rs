//! Target resolution against a live runtime.

use havoc_core::{SelectionError, SelectionPolicy};
use havoc_runtime::Runtime;
use havoc_types::Container;
use tracing::{debug, warn};

/// List containers through `runtime` and apply `policy`.
///
/// Label selectors are pushed down to the engine. Listing failures are
/// fatal; an empty result is not (the caller treats it as a no-op).
pub async fn resolve_targets(
    runtime: &dyn Runtime,
    policy: &SelectionPolicy,
    all: bool,
) -> Result<Vec<Container>, SelectionError> {
    let candidates = runtime
        .list_containers(&policy.list_options(all))
        .await
        .map_err(|e| SelectionError::Listing(e.to_string()))?;
    debug!(candidates = candidates.len(), engine = %runtime.engine(), "listed containers");

    let targets = policy.select(candidates, &mut rand::thread_rng());
    if targets.is_empty() {
        warn!("no containers matched the selection");
    }
    Ok(targets)
}
