//! Contracts for the native collaborators that register alarms with the OS and
//! play their sound, plus a file-backed registry standing in for the OS alarm table.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alarm::model::ClusterProfile;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler rejected the alarm cluster: {0}")]
    Rejected(String),
    #[error("scheduler is unavailable: {0}")]
    Unavailable(String),
    #[error("unable to access alarm registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("alarm registry {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CancelOutcome {
    Cancelled(usize),
    NothingToCancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredAlarm {
    pub request_code: u32,
    pub fire_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone_uri: Option<String>,
}

pub trait AlarmScheduler {
    /// Registers every occurrence of `profile`, replacing whatever was registered.
    fn set_alarm_cluster(&mut self, profile: &ClusterProfile) -> Result<usize, SchedulerError>;

    fn cancel_all_alarms(&mut self) -> Result<CancelOutcome, SchedulerError>;

    /// Silences a ringing alarm. Succeeds when nothing is ringing.
    fn stop_current_sound(&mut self) -> Result<(), SchedulerError>;

    fn registered_alarms(&self) -> Result<Vec<RegisteredAlarm>, SchedulerError>;
}

/// The registrations the OS layer is expected to hold for `profile`. Request codes
/// are occurrence indices; an empty pool leaves the platform default sound.
pub fn registrations_for(profile: &ClusterProfile) -> Vec<RegisteredAlarm> {
    profile
        .occurrences()
        .map(|occurrence| RegisteredAlarm {
            request_code: occurrence.index,
            fire_at: occurrence.fire_at,
            tone_uri: occurrence.tone.map(|tone| tone.uri.clone()),
        })
        .collect()
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryFile {
    #[serde(default)]
    alarms: Vec<RegisteredAlarm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sounding_tone_uri: Option<String>,
}

/// Keeps registered alarms in a JSON file. A missing file is an empty registry.
#[derive(Debug, Clone)]
pub struct RegistryScheduler {
    path: PathBuf,
}

impl RegistryScheduler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marks an alarm as ringing, the way the OS receiver does when one fires.
    pub fn mark_sounding(&mut self, tone_uri: Option<String>) -> Result<(), SchedulerError> {
        let mut registry = self.load()?;
        registry.sounding_tone_uri = Some(tone_uri.unwrap_or_default());
        self.save(&registry)
    }

    pub fn is_sounding(&self) -> Result<bool, SchedulerError> {
        Ok(self.load()?.sounding_tone_uri.is_some())
    }

    fn load(&self) -> Result<RegistryFile, SchedulerError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RegistryFile::default());
            }
            Err(source) => {
                return Err(SchedulerError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(RegistryFile::default());
        }
        serde_json::from_str(&content).map_err(|err| SchedulerError::Corrupt {
            path: self.path.clone(),
            message: format!("line {}, column {}: {err}", err.line(), err.column()),
        })
    }

    fn save(&self, registry: &RegistryFile) -> Result<(), SchedulerError> {
        let text = serde_json::to_string_pretty(registry).map_err(|err| SchedulerError::Corrupt {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        fs::write(&self.path, format!("{text}\n")).map_err(|source| SchedulerError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl AlarmScheduler for RegistryScheduler {
    fn set_alarm_cluster(&mut self, profile: &ClusterProfile) -> Result<usize, SchedulerError> {
        let mut registry = self.load()?;
        registry.alarms = registrations_for(profile);
        let registered = registry.alarms.len();
        self.save(&registry)?;
        info!(
            "event=registry_set module=scheduler status=ok registered={registered} path={}",
            self.path.display()
        );
        Ok(registered)
    }

    fn cancel_all_alarms(&mut self) -> Result<CancelOutcome, SchedulerError> {
        let mut registry = self.load()?;
        if registry.alarms.is_empty() {
            debug!("event=registry_cancel module=scheduler status=noop");
            return Ok(CancelOutcome::NothingToCancel);
        }
        let cancelled = registry.alarms.len();
        registry.alarms.clear();
        self.save(&registry)?;
        info!("event=registry_cancel module=scheduler status=ok cancelled={cancelled}");
        Ok(CancelOutcome::Cancelled(cancelled))
    }

    fn stop_current_sound(&mut self) -> Result<(), SchedulerError> {
        let mut registry = self.load()?;
        if registry.sounding_tone_uri.take().is_none() {
            return Ok(());
        }
        self.save(&registry)
    }

    fn registered_alarms(&self) -> Result<Vec<RegisteredAlarm>, SchedulerError> {
        Ok(self.load()?.alarms)
    }
}

/// Overlay ("display over other apps") permission needed to show a ringing alarm on
/// the lock screen.
pub trait OverlayPermission {
    fn is_required(&self) -> bool;

    fn has_permission(&self) -> bool;

    /// Asks the user for the permission; returns whether it is now granted.
    fn request_permission(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    NotRequired,
}

/// Permission probe with a fixed answer, for hosts that cannot prompt.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission {
    status: PermissionStatus,
}

impl StaticPermission {
    pub fn new(status: PermissionStatus) -> Self {
        Self { status }
    }
}

impl OverlayPermission for StaticPermission {
    fn is_required(&self) -> bool {
        self.status != PermissionStatus::NotRequired
    }

    fn has_permission(&self) -> bool {
        self.status == PermissionStatus::Granted
    }

    fn request_permission(&mut self) -> bool {
        self.has_permission()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveTime, TimeZone};
    use tempfile::tempdir;

    use super::*;
    use crate::alarm::calculator::compute_profile_in_tz;
    use crate::alarm::model::ClusterParams;
    use crate::alarm::tone::{Tone, TonePool};

    fn profile(count: i64) -> ClusterProfile {
        let pool = TonePool::from_tones(vec![
            Tone::custom("A", "content://a"),
            Tone::custom("B", "content://b"),
        ]);
        let params = ClusterParams::new(
            NaiveTime::from_hms_opt(7, 0, 0).expect("time"),
            10,
            count,
            pool,
        );
        let now = Utc
            .with_ymd_and_hms(2026, 10, 19, 6, 0, 0)
            .single()
            .expect("valid");
        compute_profile_in_tz(&params, &now)
    }

    #[test]
    fn registrations_follow_schedule_and_rotation() {
        let regs = registrations_for(&profile(3));
        assert_eq!(regs.len(), 3);
        assert_eq!(regs[0].request_code, 0);
        assert_eq!(regs[2].tone_uri.as_deref(), Some("content://a"));
        assert_eq!(regs[1].fire_at - regs[0].fire_at, chrono::Duration::minutes(10));
    }

    #[test]
    fn registry_replaces_previous_cluster() {
        let dir = tempdir().expect("tempdir");
        let mut registry = RegistryScheduler::new(dir.path().join("registry.json"));

        assert_eq!(registry.set_alarm_cluster(&profile(5)).expect("set"), 5);
        assert_eq!(registry.set_alarm_cluster(&profile(2)).expect("set"), 2);
        assert_eq!(registry.registered_alarms().expect("list").len(), 2);
    }

    #[test]
    fn cancel_reports_nothing_to_cancel_on_empty_registry() {
        let dir = tempdir().expect("tempdir");
        let mut registry = RegistryScheduler::new(dir.path().join("registry.json"));
        assert_eq!(
            registry.cancel_all_alarms().expect("cancel"),
            CancelOutcome::NothingToCancel
        );

        registry.set_alarm_cluster(&profile(4)).expect("set");
        assert_eq!(
            registry.cancel_all_alarms().expect("cancel"),
            CancelOutcome::Cancelled(4)
        );
        assert!(registry.registered_alarms().expect("list").is_empty());
    }

    #[test]
    fn stop_sound_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let mut registry = RegistryScheduler::new(dir.path().join("registry.json"));
        registry.stop_current_sound().expect("stop with nothing ringing");

        registry
            .mark_sounding(Some("content://a".to_string()))
            .expect("ring");
        assert!(registry.is_sounding().expect("status"));
        registry.stop_current_sound().expect("stop");
        registry.stop_current_sound().expect("stop again");
        assert!(!registry.is_sounding().expect("status"));
    }

    #[test]
    fn corrupt_registry_is_reported() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");
        fs::write(&path, "{ nope").expect("write");
        let registry = RegistryScheduler::new(&path);
        let err = registry.registered_alarms().expect_err("corrupt");
        assert!(err.to_string().contains("is corrupt"));
    }

    #[test]
    fn static_permission_answers() {
        let denied = StaticPermission::new(PermissionStatus::Denied);
        assert!(denied.is_required());
        assert!(!denied.has_permission());
        assert!(!StaticPermission::new(PermissionStatus::NotRequired).is_required());
        assert!(StaticPermission::new(PermissionStatus::Granted).has_permission());
    }
}
