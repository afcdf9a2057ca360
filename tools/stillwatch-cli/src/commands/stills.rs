//! List or delete stored stills.

use stillwatch_common::config::AppConfig;
use stillwatch_engine::StillStore;

pub fn run(config: &AppConfig, delete: Option<String>, json: bool) -> anyhow::Result<()> {
    let store = StillStore::new(&config.storage.stills_dir, config.camera.jpeg_quality);

    if let Some(name) = delete {
        store.delete(&name)?;
        println!("Deleted {name}");
        return Ok(());
    }

    let stills = store.list()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stills)?);
        return Ok(());
    }

    println!("Stills: {} ({} files)", store.dir().display(), stills.len());
    for still in &stills {
        println!(
            "  {}  {:>9} bytes  {}",
            still.created.format("%Y-%m-%d %H:%M:%S"),
            still.size_bytes,
            still.filename
        );
    }
    Ok(())
}
