pub mod depot;
pub mod flaky;

pub use depot::TestDepot;
pub use flaky::FlakyStore;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a test-friendly subscriber filtered by `RUST_LOG` (default
/// `warn`). Safe to call from every test; only the first call takes effect.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_test_writer())
        .try_init()
        .ok();
}
