use chrono::{DateTime, NaiveTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alarm::tone::TonePool;

/// The native module only cancels request codes below this bound.
pub const MAX_ALARM_COUNT: u32 = 50;

/// A cluster never spaces its alarms more than a day apart.
pub const MAX_INTERVAL_MINUTES: u32 = 24 * 60;

pub const DEFAULT_INTERVAL_MINUTES: u32 = 5;
pub const DEFAULT_ALARM_COUNT: u32 = 3;

#[derive(Debug, Error)]
pub enum ProfileCodecError {
    #[error("invalid JSON at line {line}, column {column}: {source}")]
    Json {
        line: usize,
        column: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode cluster profile: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("invalid wakeTime '{0}', expected an ISO-8601 timestamp")]
    WakeTime(String),
    #[error("invalid wakeTimeOfDay '{0}', expected HH:MM or HH:MM:SS")]
    WakeTimeOfDay(String),
    #[error("{field} must be >= 1, found {value}")]
    NonPositive { field: &'static str, value: i64 },
}

impl ProfileCodecError {
    fn json(err: serde_json::Error) -> Self {
        Self::Json {
            line: err.line(),
            column: err.column(),
            source: err,
        }
    }
}

/// Interprets user input for an interval or alarm count. Anything that is not a
/// positive integer becomes `1`.
pub fn sanitize_positive(raw: &str) -> u32 {
    raw.trim()
        .parse::<i64>()
        .map(clamp_positive)
        .unwrap_or(1)
}

fn clamp_positive(value: i64) -> u32 {
    if value < 1 {
        1
    } else {
        u32::try_from(value).unwrap_or(u32::MAX)
    }
}

pub fn parse_wake_time_of_day(input: &str) -> Result<NaiveTime, ProfileCodecError> {
    let trimmed = input.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f"))
        .map(truncate_to_minute)
        .map_err(|_| ProfileCodecError::WakeTimeOfDay(input.to_string()))
}

pub fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

/// Validated calculator input. Construction is the clamping boundary, so every
/// value reaching the calculator is a positive integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterParams {
    wake_time_of_day: NaiveTime,
    interval_minutes: u32,
    alarm_count: u32,
    tone_pool: TonePool,
}

impl ClusterParams {
    pub fn new(
        wake_time_of_day: NaiveTime,
        interval: i64,
        alarm_count: i64,
        tone_pool: TonePool,
    ) -> Self {
        Self {
            wake_time_of_day: truncate_to_minute(wake_time_of_day),
            interval_minutes: clamp_positive(interval).min(MAX_INTERVAL_MINUTES),
            alarm_count: clamp_positive(alarm_count).min(MAX_ALARM_COUNT),
            tone_pool,
        }
    }

    pub fn wake_time_of_day(&self) -> NaiveTime {
        self.wake_time_of_day
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    pub fn alarm_count(&self) -> u32 {
        self.alarm_count
    }

    pub fn tone_pool(&self) -> &TonePool {
        &self.tone_pool
    }

    pub fn tone_pool_mut(&mut self) -> &mut TonePool {
        &mut self.tone_pool
    }

    pub fn set_wake_time_of_day(&mut self, wake_time_of_day: NaiveTime) {
        self.wake_time_of_day = truncate_to_minute(wake_time_of_day);
    }

    pub fn set_interval(&mut self, raw: &str) {
        self.interval_minutes = sanitize_positive(raw).min(MAX_INTERVAL_MINUTES);
    }

    pub fn set_alarm_count(&mut self, raw: &str) {
        self.alarm_count = sanitize_positive(raw).min(MAX_ALARM_COUNT);
    }
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self::new(
            NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            i64::from(DEFAULT_INTERVAL_MINUTES),
            i64::from(DEFAULT_ALARM_COUNT),
            TonePool::new(),
        )
    }
}

/// Unvalidated input as the UI collects it: numbers arrive as free text.
#[derive(Debug, Clone)]
pub struct RawClusterConfig {
    pub wake_time_of_day: NaiveTime,
    pub interval: String,
    pub alarm_count: String,
    pub tone_pool: TonePool,
}

impl From<RawClusterConfig> for ClusterParams {
    fn from(raw: RawClusterConfig) -> Self {
        let mut params = ClusterParams::new(raw.wake_time_of_day, 1, 1, raw.tone_pool);
        params.set_interval(&raw.interval);
        params.set_alarm_count(&raw.alarm_count);
        params
    }
}

/// The persisted, fully resolved cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterProfile {
    pub wake_time: DateTime<Utc>,
    pub interval_minutes: u32,
    pub alarm_count: u32,
    pub tone_pool: TonePool,
}

pub fn serialize_profile(profile: &ClusterProfile) -> Result<String, ProfileCodecError> {
    let file = ClusterProfileFile {
        wake_time: format_wake_time(profile.wake_time),
        interval: i64::from(profile.interval_minutes),
        alarm_count: i64::from(profile.alarm_count),
        tone_pool: profile.tone_pool.clone(),
    };
    serde_json::to_string(&file).map_err(ProfileCodecError::Encode)
}

pub fn deserialize_profile(content: &str) -> Result<ClusterProfile, ProfileCodecError> {
    let raw = serde_json::from_str::<ClusterProfileFile>(content).map_err(ProfileCodecError::json)?;
    let wake_time = DateTime::parse_from_rfc3339(&raw.wake_time)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|_| ProfileCodecError::WakeTime(raw.wake_time.clone()))?;

    Ok(ClusterProfile {
        wake_time,
        interval_minutes: require_positive("interval", raw.interval)?,
        alarm_count: require_positive("alarmCount", raw.alarm_count)?,
        tone_pool: raw.tone_pool,
    })
}

pub fn serialize_draft(draft: &ClusterParams) -> Result<String, ProfileCodecError> {
    let file = ClusterDraftFile {
        wake_time_of_day: draft.wake_time_of_day.format("%H:%M:%S").to_string(),
        interval: i64::from(draft.interval_minutes),
        alarm_count: i64::from(draft.alarm_count),
        tone_pool: draft.tone_pool.clone(),
    };
    serde_json::to_string(&file).map_err(ProfileCodecError::Encode)
}

/// Drafts are edited input, so out-of-range numbers are clamped rather than rejected.
pub fn deserialize_draft(content: &str) -> Result<ClusterParams, ProfileCodecError> {
    let raw = serde_json::from_str::<ClusterDraftFile>(content).map_err(ProfileCodecError::json)?;
    let wake_time_of_day = parse_wake_time_of_day(&raw.wake_time_of_day)?;
    Ok(ClusterParams::new(
        wake_time_of_day,
        raw.interval,
        raw.alarm_count,
        raw.tone_pool,
    ))
}

pub fn format_wake_time(wake_time: DateTime<Utc>) -> String {
    wake_time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn require_positive(field: &'static str, value: i64) -> Result<u32, ProfileCodecError> {
    if value < 1 {
        return Err(ProfileCodecError::NonPositive { field, value });
    }
    u32::try_from(value).map_err(|_| ProfileCodecError::NonPositive { field, value })
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterProfileFile {
    wake_time: String,
    interval: i64,
    alarm_count: i64,
    #[serde(default)]
    tone_pool: TonePool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterDraftFile {
    wake_time_of_day: String,
    #[serde(default = "default_interval")]
    interval: i64,
    #[serde(default = "default_alarm_count")]
    alarm_count: i64,
    #[serde(default)]
    tone_pool: TonePool,
}

fn default_interval() -> i64 {
    i64::from(DEFAULT_INTERVAL_MINUTES)
}

fn default_alarm_count() -> i64 {
    i64::from(DEFAULT_ALARM_COUNT)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::alarm::tone::{Tone, default_tones};

    fn sample_profile() -> ClusterProfile {
        let mut pool = TonePool::new();
        pool.add_default_tones(vec![default_tones().remove(1)]);
        pool.add_custom_tones(vec![Tone::custom("birds", "content://media/external/audio/77")]);
        ClusterProfile {
            wake_time: Utc
                .with_ymd_and_hms(2026, 10, 20, 5, 30, 0)
                .single()
                .expect("valid"),
            interval_minutes: 7,
            alarm_count: 4,
            tone_pool: pool,
        }
    }

    #[test]
    fn non_numeric_or_non_positive_input_falls_back_to_one() {
        assert_eq!(sanitize_positive("12"), 12);
        assert_eq!(sanitize_positive(" 3 "), 3);
        assert_eq!(sanitize_positive(""), 1);
        assert_eq!(sanitize_positive("abc"), 1);
        assert_eq!(sanitize_positive("0"), 1);
        assert_eq!(sanitize_positive("-4"), 1);
        assert_eq!(sanitize_positive("2.5"), 1);
    }

    #[test]
    fn raw_config_is_clamped_at_the_boundary() {
        let params = ClusterParams::from(RawClusterConfig {
            wake_time_of_day: NaiveTime::from_hms_milli_opt(6, 45, 31, 250).expect("time"),
            interval: "nope".to_string(),
            alarm_count: "500".to_string(),
            tone_pool: TonePool::new(),
        });
        assert_eq!(params.interval_minutes(), 1);
        assert_eq!(params.alarm_count(), MAX_ALARM_COUNT);
        assert_eq!(
            params.wake_time_of_day(),
            NaiveTime::from_hms_opt(6, 45, 0).expect("time")
        );
    }

    #[test]
    fn oversized_interval_is_capped_at_a_day() {
        let params = ClusterParams::from(RawClusterConfig {
            wake_time_of_day: NaiveTime::from_hms_opt(7, 0, 0).expect("time"),
            interval: "4000000000".to_string(),
            alarm_count: "50".to_string(),
            tone_pool: TonePool::new(),
        });
        assert_eq!(params.interval_minutes(), MAX_INTERVAL_MINUTES);
        assert_eq!(params.alarm_count(), MAX_ALARM_COUNT);

        let direct = ClusterParams::new(NaiveTime::MIN, i64::MAX, i64::MAX, TonePool::new());
        assert_eq!(direct.interval_minutes(), MAX_INTERVAL_MINUTES);
        assert_eq!(direct.alarm_count(), MAX_ALARM_COUNT);
    }

    #[test]
    fn profile_round_trips_field_for_field() {
        let profile = sample_profile();
        let text = serialize_profile(&profile).expect("serialize");
        let restored = deserialize_profile(&text).expect("deserialize");
        assert_eq!(restored, profile);
        assert_eq!(restored.tone_pool.tones()[0].name, "Losing Game");
        assert_eq!(restored.tone_pool.tones()[1].name, "birds");
    }

    #[test]
    fn profile_uses_the_documented_json_shape() {
        let text = serialize_profile(&sample_profile()).expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["wakeTime"], "2026-10-20T05:30:00.000Z");
        assert_eq!(value["interval"], 7);
        assert_eq!(value["alarmCount"], 4);
        assert_eq!(value["tonePool"][0]["uri"], default_tones()[1].uri);
        assert_eq!(value["tonePool"][1]["isDefault"], false);
    }

    #[test]
    fn accepts_offset_timestamps_written_elsewhere() {
        let text = r#"{"wakeTime":"2026-10-20T07:30:00+02:00","interval":5,"alarmCount":2,"tonePool":[]}"#;
        let profile = deserialize_profile(text).expect("valid profile");
        assert_eq!(
            profile.wake_time,
            Utc.with_ymd_and_hms(2026, 10, 20, 5, 30, 0)
                .single()
                .expect("valid")
        );
        assert!(profile.tone_pool.is_empty());
    }

    #[test]
    fn rejects_non_positive_persisted_values() {
        let text = r#"{"wakeTime":"2026-10-20T07:30:00Z","interval":0,"alarmCount":2}"#;
        let err = deserialize_profile(text).expect_err("zero interval should fail");
        assert!(err.to_string().contains("interval must be >= 1"));
    }

    #[test]
    fn rejects_malformed_profile_json() {
        let err = deserialize_profile("{ not json").expect_err("malformed should fail");
        assert!(err.to_string().contains("invalid JSON"));

        let err = deserialize_profile(
            r#"{"wakeTime":"tomorrow","interval":1,"alarmCount":1,"tonePool":[]}"#,
        )
        .expect_err("bad timestamp should fail");
        assert!(err.to_string().contains("invalid wakeTime"));
    }

    #[test]
    fn draft_round_trips_and_clamps_stored_numbers() {
        let mut draft = ClusterParams::default();
        draft.set_interval("9");
        draft.tone_pool_mut().add_default_tones(default_tones());
        let text = serialize_draft(&draft).expect("serialize");
        assert_eq!(deserialize_draft(&text).expect("deserialize"), draft);

        let clamped = deserialize_draft(r#"{"wakeTimeOfDay":"06:10","interval":-3,"alarmCount":0}"#)
            .expect("clamped draft");
        assert_eq!(clamped.interval_minutes(), 1);
        assert_eq!(clamped.alarm_count(), 1);
    }

    #[test]
    fn parses_wake_time_of_day_variants() {
        let expected = NaiveTime::from_hms_opt(7, 5, 0).expect("time");
        assert_eq!(parse_wake_time_of_day("07:05").expect("hh:mm"), expected);
        assert_eq!(parse_wake_time_of_day("07:05:59").expect("hh:mm:ss"), expected);
        assert!(parse_wake_time_of_day("25:00").is_err());
    }
}
