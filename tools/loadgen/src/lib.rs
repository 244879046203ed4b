pub mod client;
pub mod config;
pub mod engine;
pub mod operation;
pub mod report;
pub mod stats;
pub mod worker;

pub use config::{Cli, LoadGenConfig};
pub use engine::StartupError;
pub use operation::{Operation, OperationMix};
pub use report::LoadGenReport;
pub use stats::{RunStatistics, StatsSnapshot};

use tokio_util::sync::CancellationToken;

/// Wait for the target to report healthy, then drive load until the
/// configured duration passes or `token` is cancelled.
pub async fn run_load_test(
    config: LoadGenConfig,
    token: CancellationToken,
) -> Result<LoadGenReport, StartupError> {
    engine::run(config, token).await
}
