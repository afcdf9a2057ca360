//! Print the camera profile table.

use stillwatch_model::CameraProfile;

pub fn run() -> anyhow::Result<()> {
    for profile in CameraProfile::ALL {
        let (low, high) = profile.luma_range();
        println!("{profile}: mean luma {low:.0} to {high:.0}");
        println!("{}", serde_json::to_string_pretty(&profile.controls())?);
        println!();
    }
    Ok(())
}
