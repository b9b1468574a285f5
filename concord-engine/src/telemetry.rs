//! Tracing subscriber setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str =
    "warn,concord_engine=info,concord_fsm=info,concord_roles=info,concord_snapshot=info,concord_session=info";

/// Install a formatted `tracing` subscriber honouring `RUST_LOG`.
///
/// Safe to call more than once; only the first call installs a subscriber.
/// Returns whether this call did.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(default_filter = DEFAULT_FILTER, "Tracing initialized");
    }
    installed
}
