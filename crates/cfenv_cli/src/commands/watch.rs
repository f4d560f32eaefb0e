//! Watch command implementation.

use cfenv_sync::{
    CfenvClient, CfenvError, CfenvResult, HotUpdateConfig, HttpClient, Snapshot, UpdateReason,
};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{info, warn};

/// How long to wait for the worker after Ctrl-C.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Builds the hot update configuration from command-line seconds.
pub fn hot_update_config(
    interval: f64,
    max_interval: f64,
    bootstrap: bool,
) -> CfenvResult<HotUpdateConfig> {
    let seconds = |name: &str, value: f64| {
        Duration::try_from_secs_f64(value)
            .map_err(|_| CfenvError::Config(format!("{name} must be a non-negative number")))
    };
    Ok(HotUpdateConfig::new(
        seconds("interval", interval)?,
        seconds("max-interval", max_interval)?,
    )
    .with_bootstrap(bootstrap))
}

/// Logs a delivered snapshot.
pub fn log_update(snapshot: &Snapshot, reason: UpdateReason) {
    info!(
        reason = %reason,
        updated_at = %snapshot.metadata.updated_at,
        entries = snapshot.len(),
        checksum = snapshot.checksum(),
        "env updated"
    );
}

/// Runs the watch command until Ctrl-C.
pub fn run<C: HttpClient>(
    client: &CfenvClient<C>,
    config: HotUpdateConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let (interrupt_tx, interrupt_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })?;

    let updater = client.create_hot_updater(
        log_update,
        Some(Box::new(|error: &CfenvError| {
            warn!(error = %error, "refresh failed");
        })),
        config,
    );
    updater.start()?;
    info!(
        project = %client.config().project,
        environment = %client.config().environment,
        "watching for changes, press Ctrl-C to stop"
    );

    let _ = interrupt_rx.recv();
    if !updater.stop(Some(STOP_TIMEOUT)) {
        warn!("worker did not stop in time");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_seconds() {
        let config = hot_update_config(0.2, 0.0, false).unwrap();
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.max_interval, Duration::from_secs(1));
        assert!(!config.bootstrap);

        let config = hot_update_config(30.0, 300.0, true).unwrap();
        assert_eq!(config.max_interval, Duration::from_secs(300));
        assert!(config.bootstrap);
    }

    #[test]
    fn negative_seconds_rejected() {
        assert!(hot_update_config(-1.0, 300.0, true).is_err());
        assert!(hot_update_config(30.0, f64::NAN, true).is_err());
    }
}
