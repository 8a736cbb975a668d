//! Frame pacer demo host.
//!
//! Runs a synthetic render loop paced by [`FramePacer`], logs diagnostics
//! once per second and, when `tune_on_start` is set, auto-tunes the
//! controller and writes the winning gains back to the config file.

use frame_pacer::{logging, ConfigManager, FramePacer, Gains, PacerError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Interval between diagnostics log lines.
const REPORT_INTERVAL_SECS: u64 = 1;

/// Graceful shutdown timeout in seconds
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

#[tokio::main]
async fn main() -> Result<(), PacerError> {
    let _log_guard = logging::init_logging().map_err(|e| {
        eprintln!("Failed to initialize logging: {}", e);
        e
    })?;

    info!("Frame pacer demo starting...");

    let result = run().await;

    match &result {
        Ok(()) => info!("Frame pacer demo shut down gracefully"),
        Err(e) => error!("Frame pacer demo error: {}", e),
    }

    result
}

async fn run() -> Result<(), PacerError> {
    let config_path = ConfigManager::default_path();
    let config_manager = Arc::new(ConfigManager::load_or_default(&config_path)?);
    info!("Configuration loaded from {:?}", config_path);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = setup_signal_handlers(shutdown_tx_clone).await {
            error!("Signal handler error: {}", e);
        }
    });

    // Pacing blocks the thread, so the loop lives on the blocking pool.
    let loop_config = Arc::clone(&config_manager);
    let loop_shutdown_rx = shutdown_rx.clone();
    let render_handle =
        tokio::task::spawn_blocking(move || run_render_loop(&loop_config, loop_shutdown_rx));

    let mut shutdown_rx_main = shutdown_rx.clone();
    shutdown_rx_main.changed().await.ok();
    info!("Shutdown signal received, stopping render loop...");

    let shutdown_timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
    match tokio::time::timeout(shutdown_timeout, render_handle).await {
        Ok(Ok(gains)) => info!(
            kp = gains.kp,
            ki = gains.ki,
            kd = gains.kd,
            "Render loop stopped"
        ),
        Ok(Err(e)) => return Err(PacerError::Runtime(format!("render loop panicked: {}", e))),
        Err(_) => warn!("Render loop did not stop within {}s", SHUTDOWN_TIMEOUT_SECS),
    }

    Ok(())
}

/// Drive the pacer until shutdown. Returns the gains live at exit.
fn run_render_loop(config_manager: &ConfigManager, shutdown_rx: watch::Receiver<bool>) -> Gains {
    let config = config_manager.get();
    let target_ms = config.target_frame_time_ms();
    let mut pacer = FramePacer::from_config(&config);

    if config.tune_on_start {
        pacer.start_tuning();
    }

    info!(
        target_ms,
        target_fps = config.target_fps,
        tuning = pacer.is_tuning(),
        "Render loop running"
    );

    let report_interval = Duration::from_secs(REPORT_INTERVAL_SECS);
    let mut last_report = Instant::now();
    let mut was_tuning = pacer.is_tuning();
    let mut frame: u64 = 0;

    while !*shutdown_rx.borrow() {
        simulate_work(frame, target_ms);
        pacer.pace(target_ms);
        frame += 1;

        if was_tuning && !pacer.is_tuning() {
            persist_tuned_gains(config_manager, &pacer);
        }
        was_tuning = pacer.is_tuning();

        if last_report.elapsed() >= report_interval {
            last_report = Instant::now();
            let diag = pacer.diagnostics();
            info!(
                fps = diag.fps,
                frame_time_ms = diag.smoothed_frame_time_ms,
                sleep_ms = diag.commanded_sleep_ms,
                avg_wait_ms = diag.counters.average_wait_ms(),
                error_ms = diag.previous_error,
                integral = diag.integral,
                tuning = %pacer.tuning_status().summary(),
                "Pacer status"
            );
        }
    }

    if pacer.is_tuning() {
        pacer.stop_tuning();
        persist_tuned_gains(config_manager, &pacer);
    }

    Gains::from(pacer.current_gains())
}

fn persist_tuned_gains(config_manager: &ConfigManager, pacer: &FramePacer) {
    if pacer.last_tuning_report().and_then(|r| r.best).is_none() {
        return;
    }
    let gains = Gains::from(pacer.current_gains());
    match config_manager.update_gains(gains) {
        Ok(()) => info!(path = ?config_manager.path(), "Tuned gains saved"),
        Err(e) => error!("Failed to save tuned gains: {}", e),
    }
}

/// Stand-in for a frame's update and render work: between 25% and 70%
/// of the frame budget, varying frame to frame.
fn simulate_work(frame: u64, target_ms: f64) {
    let fraction = 0.25 + 0.45 * ((frame % 13) as f64 / 12.0);
    std::thread::sleep(Duration::from_secs_f64(target_ms * fraction / 1000.0));
}

/// Set up signal handlers for graceful shutdown.
#[cfg(unix)]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}

#[cfg(not(unix))]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    let _ = shutdown_tx.send(true);
    Ok(())
}
