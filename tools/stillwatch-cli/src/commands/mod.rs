pub mod config;
pub mod events;
pub mod profiles;
pub mod run;
pub mod simulate;
pub mod stills;
