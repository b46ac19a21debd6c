use tracing::info;

use buildplane_catalog::BuildCatalog;
use buildplane_core::{BuildKey, BuildStatus, BuildplaneConfig};
use buildplane_pipeline::{BuildOutcome, CancellationToken, Collaborators, Orchestrator};

pub fn cancel(catalog: &BuildCatalog, key: &BuildKey) -> anyhow::Result<()> {
    let mut build = catalog.require(key)?;
    catalog.update_status(&mut build, BuildStatus::CancelRequested)?;
    println!("cancellation requested for {key}");
    Ok(())
}

pub fn clone(
    catalog: BuildCatalog,
    config: &BuildplaneConfig,
    source: &BuildKey,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(catalog, Collaborators::default(), &config.pipeline);
    let clone = orchestrator.clone_build(source)?;
    println!("{}", clone.key.build_id);
    Ok(())
}

/// The binary ships no release validator, so online runs would always fail
/// at the validation stage.
fn ensure_runnable(config: &BuildplaneConfig) -> anyhow::Result<()> {
    if !config.pipeline.offline_mode {
        anyhow::bail!(
            "no release validator is available to this binary; \
             set `offline_mode = true` under [pipeline] to run builds"
        );
    }
    Ok(())
}

/// Drive one build to a terminal status. Ctrl-C requests cooperative cancellation.
pub async fn run(
    catalog: BuildCatalog,
    config: &BuildplaneConfig,
    key: &BuildKey,
) -> anyhow::Result<()> {
    ensure_runnable(config)?;
    let orchestrator = Orchestrator::new(catalog, Collaborators::default(), &config.pipeline);
    let token = CancellationToken::new();

    let signal_token = token.clone();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling at the next checkpoint");
            signal_token.cancel();
        }
    });

    let outcome = orchestrator.run(key, &token).await;
    signal.abort();

    match outcome? {
        BuildOutcome::Released { warnings: false } => println!("{key}: RELEASE_COMPLETE"),
        BuildOutcome::Released { warnings: true } => {
            println!("{key}: RELEASE_COMPLETE_WITH_WARNINGS")
        }
        BuildOutcome::Rejected(status) => println!("{key}: rejected with {status}"),
        BuildOutcome::Failed(message) => println!("{key}: FAILED: {message}"),
        BuildOutcome::Cancelled => println!("{key}: CANCELLED"),
    }
    Ok(())
}
