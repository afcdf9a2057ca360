//! Run the engine against a synthetic camera.

use std::path::PathBuf;
use std::time::Duration;

use stillwatch_camera::{Block, SyntheticCamera};
use stillwatch_common::config::AppConfig;
use stillwatch_engine::Monitor;

/// Background levels the scene cycles through: two steps each of DAY,
/// DUSK and NIGHT light.
const LIGHT_CYCLE: [u8; 6] = [200, 200, 115, 115, 40, 40];

pub async fn run(
    mut config: AppConfig,
    duration_secs: u64,
    output: Option<PathBuf>,
    scene_period_secs: u64,
    status_period_secs: u64,
) -> anyhow::Result<()> {
    if let Some(dir) = output {
        config.storage.stills_dir = dir.join("stills");
        config.storage.event_log = dir.join("logs").join("motion_events.json");
    }
    let scene_period = Duration::from_secs(scene_period_secs.max(1));
    config.calibration.settle_secs = 1;
    config.calibration.period_secs = scene_period.as_secs();
    config.validate()?;

    let [main_w, main_h] = config.camera.main_size;
    let [lores_w, lores_h] = config.camera.lores_size;
    let camera = SyntheticCamera::new((main_w, main_h), (lores_w, lores_h));
    let scene = camera.scene();

    println!("Simulating for {duration_secs}s");
    println!("  Main stream: {main_w}x{main_h}");
    println!("  Lores stream: {lores_w}x{lores_h}");
    println!("  Stills: {}", config.storage.stills_dir.display());
    println!("  Event log: {}", config.storage.event_log.display());
    println!();

    let monitor = Monitor::new(config, Box::new(camera));
    monitor.start_monitoring().await?;

    let block = (lores_w / 8, lores_h / 4);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration_secs);
    let mut scene_tick = tokio::time::interval(scene_period);
    let mut status_tick = tokio::time::interval(Duration::from_secs(status_period_secs.max(1)));
    let mut step = 0usize;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted");
                break;
            }
            _ = scene_tick.tick() => {
                let light = LIGHT_CYCLE[step % LIGHT_CYCLE.len()];
                let x = (step as u32 * block.0) % lores_w.saturating_sub(block.0).max(1);
                scene.set_background(light);
                scene.set_blocks(vec![Block::new(x, lores_h / 3, block.0, block.1, 255 - light / 2)]);
                tracing::debug!(step, light, x, "Scene changed");
                step += 1;
            }
            _ = status_tick.tick() => {
                println!("{}", serde_json::to_string(&monitor.status())?);
            }
        }
    }

    monitor.shutdown().await;

    let events = monitor.recent_events(None);
    println!();
    println!("Motion events: {}", events.len());
    if let Some(last) = events.last() {
        println!(
            "  Last: {} ({} pixels changed)",
            last.timestamp.to_rfc3339(),
            last.pixels_changed
        );
    }
    println!("Final profile: {:?}", monitor.status().active_profile);

    Ok(())
}
