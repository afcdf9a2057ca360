//! Run the engine against the configured camera device until Ctrl+C.

use std::time::Duration;

use stillwatch_camera::CameraBackend;
use stillwatch_common::config::AppConfig;
use stillwatch_engine::Monitor;

pub async fn run(config: AppConfig, status_period_secs: u64) -> anyhow::Result<()> {
    config.validate()?;
    let backend = hardware_backend(&config)?;

    println!("Camera: {}", backend.name());
    println!("  Stills: {}", config.storage.stills_dir.display());
    println!("  Event log: {}", config.storage.event_log.display());
    println!("Press Ctrl+C to stop");
    println!();

    let monitor = Monitor::new(config, backend);
    monitor.start_monitoring().await?;

    let mut status_tick = tokio::time::interval(Duration::from_secs(status_period_secs.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status_tick.tick() => {
                println!("{}", serde_json::to_string(&monitor.status())?);
            }
        }
    }

    println!("Stopping...");
    monitor.shutdown().await;
    println!("Motion events logged: {}", monitor.recent_events(None).len());
    Ok(())
}

#[cfg(feature = "v4l")]
fn hardware_backend(config: &AppConfig) -> anyhow::Result<Box<dyn CameraBackend>> {
    let [main_w, main_h] = config.camera.main_size;
    let [lores_w, lores_h] = config.camera.lores_size;
    Ok(Box::new(stillwatch_camera::V4l2Camera::new(
        &config.camera.device,
        (main_w, main_h),
        (lores_w, lores_h),
    )))
}

#[cfg(not(feature = "v4l"))]
fn hardware_backend(_config: &AppConfig) -> anyhow::Result<Box<dyn CameraBackend>> {
    Err(stillwatch_common::error::StillwatchError::unsupported(
        "this build has no hardware camera backend; rebuild with `--features v4l` or use `simulate`",
    )
    .into())
}
