//! Shared engine state.
//!
//! [`SystemState`] is passed around by `Arc`. Every field has one writer at
//! a time:
//!
//! | field             | writer                                   |
//! |-------------------|------------------------------------------|
//! | `monitoring`      | `Monitor` on start/stop, orchestrator on fault |
//! | `capturing`       | burst capture (through `CapturingGuard`) |
//! | `motion_detected` | orchestrator                             |
//! | `last_motion`     | orchestrator                             |
//! | `active_profile`  | calibrator                               |
//! | `fault`           | `Monitor` on start, orchestrator on fault |
//!
//! Scalars are atomics so status readers never wait on the loops.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Local, TimeZone};

use stillwatch_common::config::MonitorSettings;
use stillwatch_model::{CameraProfile, StatusReport};

const NO_TIMESTAMP: i64 = i64::MIN;

#[derive(Debug)]
pub struct SystemState {
    monitoring: AtomicBool,
    capturing: AtomicBool,
    motion_detected: AtomicBool,
    last_motion_ms: AtomicI64,
    active_profile: AtomicU8,
    fault: Mutex<Option<String>>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            monitoring: AtomicBool::new(false),
            capturing: AtomicBool::new(false),
            motion_detected: AtomicBool::new(false),
            last_motion_ms: AtomicI64::new(NO_TIMESTAMP),
            active_profile: AtomicU8::new(encode_profile(None)),
            fault: Mutex::new(None),
        }
    }
}

impl SystemState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    pub fn set_monitoring(&self, value: bool) {
        self.monitoring.store(value, Ordering::SeqCst);
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    pub fn set_capturing(&self, value: bool) {
        self.capturing.store(value, Ordering::SeqCst);
    }

    pub fn motion_detected(&self) -> bool {
        self.motion_detected.load(Ordering::SeqCst)
    }

    pub fn set_motion_detected(&self, value: bool) {
        self.motion_detected.store(value, Ordering::SeqCst);
    }

    /// Mark motion at `at`.
    pub fn record_motion(&self, at: DateTime<Local>) {
        self.last_motion_ms.store(at.timestamp_millis(), Ordering::SeqCst);
        self.motion_detected.store(true, Ordering::SeqCst);
    }

    pub fn last_motion(&self) -> Option<DateTime<Local>> {
        match self.last_motion_ms.load(Ordering::SeqCst) {
            NO_TIMESTAMP => None,
            ms => Local.timestamp_millis_opt(ms).single(),
        }
    }

    pub fn active_profile(&self) -> Option<CameraProfile> {
        decode_profile(self.active_profile.load(Ordering::SeqCst))
    }

    pub fn set_active_profile(&self, profile: Option<CameraProfile>) {
        self.active_profile
            .store(encode_profile(profile), Ordering::SeqCst);
    }

    pub fn fault(&self) -> Option<String> {
        self.fault.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_fault(&self, fault: Option<String>) {
        *self.fault.lock().unwrap_or_else(|e| e.into_inner()) = fault;
    }

    /// Copy the state into a [`StatusReport`]. `camera_streaming` is owned by
    /// the camera resource and filled in by the caller.
    pub fn snapshot(&self) -> StatusReport {
        StatusReport {
            monitoring: self.is_monitoring(),
            capturing: self.is_capturing(),
            motion_detected: self.motion_detected(),
            last_motion: self.last_motion(),
            active_profile: self.active_profile(),
            camera_streaming: false,
            fault: self.fault(),
        }
    }
}

fn encode_profile(profile: Option<CameraProfile>) -> u8 {
    match profile {
        None => 0,
        Some(CameraProfile::Day) => 1,
        Some(CameraProfile::Dusk) => 2,
        Some(CameraProfile::Night) => 3,
    }
}

fn decode_profile(raw: u8) -> Option<CameraProfile> {
    match raw {
        1 => Some(CameraProfile::Day),
        2 => Some(CameraProfile::Dusk),
        3 => Some(CameraProfile::Night),
        _ => None,
    }
}

/// Live monitor settings. The orchestrator reads a copy every frame, so
/// changes that do not touch the region set apply without a restart.
#[derive(Debug, Default)]
pub struct SharedSettings {
    inner: RwLock<MonitorSettings>,
}

impl SharedSettings {
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    pub fn get(&self) -> MonitorSettings {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run `f` with exclusive access to the settings.
    pub fn update<T>(&self, f: impl FnOnce(&mut MonitorSettings) -> T) -> T {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_reports_nothing() {
        let report = SystemState::new().snapshot();
        assert_eq!(report, StatusReport::default());
    }

    #[test]
    fn profile_round_trips_through_the_atomic() {
        let state = SystemState::new();
        for profile in CameraProfile::ALL {
            state.set_active_profile(Some(profile));
            assert_eq!(state.active_profile(), Some(profile));
        }
        state.set_active_profile(None);
        assert_eq!(state.active_profile(), None);
    }

    #[test]
    fn record_motion_sets_flag_and_time() {
        let state = SystemState::new();
        let at = Local.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap();
        state.record_motion(at);
        let report = state.snapshot();
        assert!(report.motion_detected);
        assert_eq!(report.last_motion, Some(at));
    }

    #[test]
    fn settings_update_is_visible_to_readers() {
        let settings = SharedSettings::new(MonitorSettings::default());
        settings.update(|s| s.motion_threshold = 42);
        assert_eq!(settings.get().motion_threshold, 42);
    }
}
