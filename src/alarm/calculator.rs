use std::iter::FusedIterator;

use chrono::{
    DateTime, Datelike, Days, Local, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Timelike,
    Utc,
};

use crate::alarm::model::{ClusterParams, ClusterProfile, truncate_to_minute};
use crate::alarm::tone::Tone;

/// Resolves `params` against the wall clock in the local time zone.
pub fn compute_profile(params: &ClusterParams, now: DateTime<Local>) -> ClusterProfile {
    compute_profile_in_tz(params, &now)
}

/// Pure: the same params and `now` always give the same profile.
pub fn compute_profile_in_tz<Tz>(params: &ClusterParams, now: &DateTime<Tz>) -> ClusterProfile
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let first_fire = resolve_first_fire(params.wake_time_of_day(), now);
    ClusterProfile {
        wake_time: first_fire.with_timezone(&Utc),
        interval_minutes: params.interval_minutes(),
        alarm_count: params.alarm_count(),
        tone_pool: params.tone_pool().clone(),
    }
}

/// First instant strictly after `now` showing `wake_time_of_day` on the wall clock:
/// today if still ahead, otherwise the same time tomorrow.
pub fn resolve_first_fire<Tz>(wake_time_of_day: NaiveTime, now: &DateTime<Tz>) -> DateTime<Tz>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let timezone = now.timezone();
    let wake = truncate_to_minute(wake_time_of_day);
    let today = now.date_naive();
    let candidate = resolve_wall_clock(&timezone, today.and_time(wake));
    if candidate > *now {
        return candidate;
    }

    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    let rolled = resolve_wall_clock(&timezone, tomorrow.and_time(wake));
    if rolled > *now {
        rolled
    } else {
        // Only reachable when a DST gap pushed today's candidate past midnight.
        rolled + chrono::Duration::days(1)
    }
}

const GAP_PROBE_STEP_MINUTES: i64 = 30;
const GAP_PROBE_LIMIT: i64 = 8;

fn resolve_wall_clock<Tz>(timezone: &Tz, naive: NaiveDateTime) -> DateTime<Tz>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    for step in 0..=GAP_PROBE_LIMIT {
        let probe = naive + chrono::Duration::minutes(step * GAP_PROBE_STEP_MINUTES);
        match timezone.from_local_datetime(&probe) {
            LocalResult::Single(dt) => return dt,
            LocalResult::Ambiguous(first, _second) => return first,
            LocalResult::None => continue,
        }
    }
    timezone.from_utc_datetime(&naive)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence<'a> {
    pub index: u32,
    pub fire_at: DateTime<Utc>,
    pub tone: Option<&'a Tone>,
}

impl ClusterProfile {
    /// Saturates at the last representable instant; a persisted profile is not
    /// bound by the interval cap.
    pub fn fire_time(&self, index: u32) -> DateTime<Utc> {
        let offset = i64::from(self.interval_minutes) * i64::from(index);
        chrono::Duration::try_minutes(offset)
            .and_then(|delta| self.wake_time.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn occurrence(&self, index: u32) -> Option<Occurrence<'_>> {
        (index < self.alarm_count).then(|| Occurrence {
            index,
            fire_at: self.fire_time(index),
            tone: self.tone_pool.tone_for_occurrence(index),
        })
    }

    /// Lazily walks the schedule; call again to restart from the first alarm.
    pub fn occurrences(&self) -> Occurrences<'_> {
        Occurrences {
            profile: self,
            front: 0,
            back: self.alarm_count,
        }
    }

    pub fn last_fire_time(&self) -> DateTime<Utc> {
        self.fire_time(self.alarm_count.saturating_sub(1))
    }

    pub fn pending_occurrences(&self, now: DateTime<Utc>) -> impl Iterator<Item = Occurrence<'_>> {
        self.occurrences()
            .skip_while(move |occurrence| occurrence.fire_at <= now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.last_fire_time() <= now
    }
}

pub struct Occurrences<'a> {
    profile: &'a ClusterProfile,
    front: u32,
    back: u32,
}

impl<'a> Iterator for Occurrences<'a> {
    type Item = Occurrence<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let occurrence = self.profile.occurrence(self.front);
        self.front += 1;
        occurrence
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back.saturating_sub(self.front) as usize;
        (remaining, Some(remaining))
    }
}

impl DoubleEndedIterator for Occurrences<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        self.profile.occurrence(self.back)
    }
}

impl ExactSizeIterator for Occurrences<'_> {}

impl FusedIterator for Occurrences<'_> {}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TimeDisplayMode {
    Hour24,
    Hour12,
}

pub fn format_fire_time<Tz>(instant: &DateTime<Tz>, mode: TimeDisplayMode) -> String
where
    Tz: TimeZone,
{
    match mode {
        TimeDisplayMode::Hour24 => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}",
            instant.year(),
            instant.month(),
            instant.day(),
            instant.hour(),
            instant.minute(),
        ),
        TimeDisplayMode::Hour12 => {
            let (is_pm, hour12) = instant.hour12();
            let meridiem = if is_pm { "PM" } else { "AM" };
            format!(
                "{:04}-{:02}-{:02} {:02}:{:02} {}",
                instant.year(),
                instant.month(),
                instant.day(),
                hour12,
                instant.minute(),
                meridiem
            )
        }
    }
}

pub fn format_local_fire_time(instant: DateTime<Utc>, mode: TimeDisplayMode) -> String {
    format_fire_time(&instant.with_timezone(&Local), mode)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use chrono_tz::America::New_York;

    use super::*;
    use crate::alarm::model::{MAX_ALARM_COUNT, MAX_INTERVAL_MINUTES, RawClusterConfig};
    use crate::alarm::tone::{Tone, TonePool};

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    fn utc(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, day, hour, minute, second)
            .single()
            .expect("valid instant")
    }

    fn pool_ab() -> TonePool {
        TonePool::from_tones(vec![
            Tone::custom("A", "content://media/audio/a"),
            Tone::custom("B", "content://media/audio/b"),
        ])
    }

    #[test]
    fn passed_wake_time_rolls_to_tomorrow() {
        let params = ClusterParams::new(at(7, 0), 5, 3, TonePool::new());
        let profile = compute_profile_in_tz(&params, &utc(19, 8, 0, 0));

        assert_eq!(profile.wake_time, utc(20, 7, 0, 0));
        assert_eq!(profile.last_fire_time(), utc(20, 7, 10, 0));
        let occurrences = profile.occurrences().collect::<Vec<_>>();
        assert_eq!(occurrences.len(), 3);
        assert!(occurrences.iter().all(|occurrence| occurrence.tone.is_none()));
        assert_eq!(occurrences[1].fire_at, utc(20, 7, 5, 0));
    }

    #[test]
    fn upcoming_wake_time_stays_today_with_rotating_tones() {
        let params = ClusterParams::new(at(7, 0), 10, 4, pool_ab());
        let profile = compute_profile_in_tz(&params, &utc(19, 6, 0, 0));

        assert_eq!(profile.wake_time, utc(19, 7, 0, 0));
        let names = profile
            .occurrences()
            .map(|occurrence| occurrence.tone.expect("tone").name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, ["A", "B", "A", "B"]);
        assert_eq!(profile.last_fire_time(), utc(19, 7, 30, 0));
    }

    #[test]
    fn largest_accepted_input_stays_in_range() {
        let params = ClusterParams::from(RawClusterConfig {
            wake_time_of_day: at(7, 0),
            interval: "4000000000".to_string(),
            alarm_count: "4000000000".to_string(),
            tone_pool: TonePool::new(),
        });
        let profile = compute_profile_in_tz(&params, &utc(19, 6, 0, 0));

        assert_eq!(profile.alarm_count, MAX_ALARM_COUNT);
        assert_eq!(profile.interval_minutes, MAX_INTERVAL_MINUTES);
        assert_eq!(
            profile.last_fire_time(),
            utc(19, 7, 0, 0) + chrono::Duration::days(i64::from(MAX_ALARM_COUNT) - 1)
        );
        assert_eq!(profile.occurrences().count(), MAX_ALARM_COUNT as usize);
    }

    #[test]
    fn fire_time_saturates_for_unbounded_stored_profiles() {
        let profile = ClusterProfile {
            wake_time: utc(19, 7, 0, 0),
            interval_minutes: u32::MAX,
            alarm_count: MAX_ALARM_COUNT,
            tone_pool: TonePool::new(),
        };

        assert_eq!(profile.last_fire_time(), DateTime::<Utc>::MAX_UTC);
        let fire_times = profile
            .occurrences()
            .map(|occurrence| occurrence.fire_at)
            .collect::<Vec<_>>();
        assert_eq!(fire_times.len(), MAX_ALARM_COUNT as usize);
        assert!(fire_times.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(!profile.is_expired(utc(19, 8, 0, 0)));
    }

    #[test]
    fn wake_time_equal_to_now_is_not_considered_future() {
        let params = ClusterParams::new(at(7, 0), 1, 1, TonePool::new());
        let exact = compute_profile_in_tz(&params, &utc(19, 7, 0, 0));
        assert_eq!(exact.wake_time, utc(20, 7, 0, 0));

        let seconds_later = compute_profile_in_tz(&params, &utc(19, 7, 0, 30));
        assert_eq!(seconds_later.wake_time, utc(20, 7, 0, 0));
    }

    #[test]
    fn first_fire_is_always_strictly_after_now() {
        for hour in 0..24 {
            for minute in [0, 1, 29, 59] {
                let params = ClusterParams::new(at(hour, minute), 3, 2, TonePool::new());
                for now in [utc(19, 0, 0, 0), utc(19, 12, 30, 15), utc(19, 23, 59, 59)] {
                    let profile = compute_profile_in_tz(&params, &now);
                    assert!(profile.wake_time > now);

                    let wake_is_earlier_or_equal =
                        (hour, minute) <= (now.hour(), now.minute());
                    let expected_day = if wake_is_earlier_or_equal { 20 } else { 19 };
                    assert_eq!(profile.wake_time.day(), expected_day);
                }
            }
        }
    }

    #[test]
    fn single_alarm_cluster_keeps_interval() {
        let params = ClusterParams::new(at(9, 15), 45, 1, pool_ab());
        let profile = compute_profile_in_tz(&params, &utc(19, 6, 0, 0));
        assert_eq!(profile.interval_minutes, 45);
        assert_eq!(profile.occurrences().count(), 1);
        assert_eq!(profile.last_fire_time(), profile.wake_time);
    }

    #[test]
    fn rotation_matches_modulo_rule_for_every_occurrence() {
        let pool = TonePool::from_tones(vec![
            Tone::custom("A", "content://a"),
            Tone::custom("B", "content://b"),
            Tone::custom("C", "content://c"),
        ]);
        let params = ClusterParams::new(at(5, 0), 2, 11, pool.clone());
        let profile = compute_profile_in_tz(&params, &utc(19, 4, 0, 0));
        for occurrence in profile.occurrences() {
            let expected = &pool.tones()[occurrence.index as usize % pool.len()];
            assert_eq!(occurrence.tone, Some(expected));
        }
    }

    #[test]
    fn schedule_iterator_is_restartable_and_double_ended() {
        let params = ClusterParams::new(at(6, 0), 15, 4, TonePool::new());
        let profile = compute_profile_in_tz(&params, &utc(19, 5, 0, 0));

        let first_pass = profile.occurrences().collect::<Vec<_>>();
        let second_pass = profile.occurrences().collect::<Vec<_>>();
        assert_eq!(first_pass, second_pass);

        let mut iter = profile.occurrences();
        assert_eq!(iter.len(), 4);
        assert_eq!(iter.next_back().map(|o| o.fire_at), Some(profile.last_fire_time()));
        assert_eq!(iter.next().map(|o| o.index), Some(0));
        assert_eq!(iter.len(), 2);
        assert!(profile.occurrence(4).is_none());
    }

    #[test]
    fn pending_occurrences_skip_the_past() {
        let params = ClusterParams::new(at(6, 0), 10, 3, TonePool::new());
        let profile = compute_profile_in_tz(&params, &utc(19, 5, 0, 0));
        let pending = profile
            .pending_occurrences(utc(19, 6, 10, 0))
            .map(|o| o.index)
            .collect::<Vec<_>>();
        assert_eq!(pending, [2]);
        assert!(!profile.is_expired(utc(19, 6, 10, 0)));
        assert!(profile.is_expired(utc(19, 6, 20, 0)));
    }

    #[test]
    fn roll_forward_keeps_wall_clock_across_dst_end() {
        let params = ClusterParams::new(at(7, 0), 5, 2, TonePool::new());
        let now = New_York
            .with_ymd_and_hms(2026, 10, 31, 8, 0, 0)
            .single()
            .expect("valid");
        let profile = compute_profile_in_tz(&params, &now);
        let local = profile.wake_time.with_timezone(&New_York);
        assert_eq!(
            local.date_naive(),
            NaiveDate::from_ymd_opt(2026, 11, 1).expect("date")
        );
        assert_eq!((local.hour(), local.minute()), (7, 0));
        assert_eq!(profile.wake_time - now.with_timezone(&Utc), chrono::Duration::hours(24));
    }

    #[test]
    fn ambiguous_fall_back_time_uses_first_instance() {
        let params = ClusterParams::new(at(1, 30), 5, 1, TonePool::new());
        let now = New_York
            .with_ymd_and_hms(2026, 11, 1, 0, 0, 0)
            .single()
            .expect("valid");
        let profile = compute_profile_in_tz(&params, &now);
        let expected = match New_York.from_local_datetime(&NaiveDateTime::new(
            NaiveDate::from_ymd_opt(2026, 11, 1).expect("date"),
            at(1, 30),
        )) {
            LocalResult::Ambiguous(first, _second) => first,
            _ => panic!("expected ambiguous local time"),
        };
        assert_eq!(profile.wake_time, expected.with_timezone(&Utc));
    }

    #[test]
    fn nonexistent_spring_forward_time_moves_past_the_gap() {
        let params = ClusterParams::new(at(2, 30), 5, 1, TonePool::new());
        let now = New_York
            .with_ymd_and_hms(2026, 3, 8, 0, 30, 0)
            .single()
            .expect("valid");
        let profile = compute_profile_in_tz(&params, &now);
        let local = profile.wake_time.with_timezone(&New_York);
        assert_eq!(
            local.date_naive(),
            NaiveDate::from_ymd_opt(2026, 3, 8).expect("date")
        );
        assert_eq!((local.hour(), local.minute()), (3, 0));
        assert!(profile.wake_time > now.with_timezone(&Utc));
    }

    #[test]
    fn formats_fire_times_in_both_modes() {
        let instant = utc(20, 19, 5, 0);
        assert_eq!(
            format_fire_time(&instant, TimeDisplayMode::Hour24),
            "2026-10-20 19:05"
        );
        assert_eq!(
            format_fire_time(&instant, TimeDisplayMode::Hour12),
            "2026-10-20 07:05 PM"
        );
    }
}
