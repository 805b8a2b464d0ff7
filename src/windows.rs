//! Random instants inside the daily morning and evening nudge windows.
//!
//! Windows are wall-clock intervals in the caller's zone; the instants handed
//! back are absolute UTC points.
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rand::Rng;

/// A drawn instant must land strictly after `now + SAFETY_MARGIN_MINUTES`.
pub const SAFETY_MARGIN_MINUTES: i64 = 5;

/// A fixed clock-time interval `[start, start + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveTime,
    pub length_minutes: i64,
}

impl Window {
    pub fn new(start: NaiveTime, length_minutes: i64) -> Self {
        Self {
            start,
            length_minutes,
        }
    }

    /// 09:30 to 10:30.
    pub fn morning() -> Self {
        Self::new(
            NaiveTime::from_hms_opt(9, 30, 0).expect("valid morning window start"),
            60,
        )
    }

    /// 19:30 to 20:30.
    pub fn evening() -> Self {
        Self::new(
            NaiveTime::from_hms_opt(19, 30, 0).expect("valid evening window start"),
            60,
        )
    }

    pub fn end(&self) -> NaiveTime {
        self.start + Duration::minutes(self.length_minutes)
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        t >= self.start && t < self.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTimes {
    pub morning: DateTime<Utc>,
    pub evening: DateTime<Utc>,
}

/// Draw one instant in the morning window and one in the evening window.
///
/// Each slot is drawn independently. A draw at or before `now` plus the safety
/// margin moves to the same clock time on the following day.
pub fn pick_daily_times<Tz, R>(now: &DateTime<Tz>, rng: &mut R) -> DailyTimes
where
    Tz: TimeZone,
    R: Rng + ?Sized,
{
    DailyTimes {
        morning: pick_in_window(now, Window::morning(), rng),
        evening: pick_in_window(now, Window::evening(), rng),
    }
}

pub fn pick_in_window<Tz, R>(now: &DateTime<Tz>, window: Window, rng: &mut R) -> DateTime<Utc>
where
    Tz: TimeZone,
    R: Rng + ?Sized,
{
    let window_ms = window.length_minutes.max(1) * 60_000;
    let offset = Duration::milliseconds(rng.gen_range(0..window_ms));
    place_in_window(now, window, offset)
}

fn place_in_window<Tz: TimeZone>(
    now: &DateTime<Tz>,
    window: Window,
    offset: Duration,
) -> DateTime<Utc> {
    let tz = now.timezone();
    let today = now.date_naive();
    let threshold = now.with_timezone(&Utc) + Duration::minutes(SAFETY_MARGIN_MINUTES);

    let candidate = resolve_local(&tz, today.and_time(window.start)) + offset;
    if candidate > threshold {
        return candidate;
    }
    let tomorrow = today.succ_opt().unwrap_or(today);
    resolve_local(&tz, tomorrow.and_time(window.start)) + offset
}

/// Local calendar day of `at` in `tz`.
pub fn local_day<Tz: TimeZone>(tz: &Tz, at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(tz).date_naive()
}

/// Map a wall-clock time to an absolute instant. Ambiguous times take the
/// earliest mapping; times inside a DST gap move forward to the first wall
/// clock that exists.
pub fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = local;
    for _ in 0..(4 * 24) {
        if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
            return dt.with_timezone(&Utc);
        }
        candidate += Duration::minutes(15);
    }
    tz.from_utc_datetime(&local).with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Timelike};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn zone() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
        zone().with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn assert_in_window(now: &DateTime<FixedOffset>, at: DateTime<Utc>, window: Window) {
        let at_local = at.with_timezone(&zone());
        assert!(
            window.contains(at_local.time()),
            "{} outside {:?}",
            at_local,
            window
        );
        let day = at_local.date_naive();
        assert!(day == now.date_naive() || Some(day) == now.date_naive().succ_opt());
        assert!(at > now.with_timezone(&Utc) + Duration::minutes(SAFETY_MARGIN_MINUTES));
    }

    #[test]
    fn draws_stay_inside_windows_for_every_now() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut now = local(2025, 6, 1, 0, 0);
        let end = local(2025, 6, 3, 0, 0);
        while now < end {
            let times = pick_daily_times(&now, &mut rng);
            assert_in_window(&now, times.morning, Window::morning());
            assert_in_window(&now, times.evening, Window::evening());
            now = now + Duration::minutes(7);
        }
    }

    #[test]
    fn same_seed_same_times() {
        let now = local(2025, 6, 1, 8, 0);
        let a = pick_daily_times(&now, &mut StdRng::seed_from_u64(9));
        let b = pick_daily_times(&now, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn early_morning_schedules_both_today() {
        let now = local(2025, 6, 1, 8, 0);
        let times = pick_daily_times(&now, &mut StdRng::seed_from_u64(1));
        let morning = times.morning.with_timezone(&zone());
        let evening = times.evening.with_timezone(&zone());
        assert_eq!(morning.date_naive(), now.date_naive());
        assert_eq!(evening.date_naive(), now.date_naive());
        assert!(Window::morning().contains(morning.time()));
        assert!(Window::evening().contains(evening.time()));
    }

    #[test]
    fn draw_within_margin_moves_to_next_day() {
        let now = local(2025, 6, 1, 10, 25);
        // 10:29 is inside the window but within five minutes of now.
        let at = place_in_window(&now, Window::morning(), Duration::minutes(59));
        let at_local = at.with_timezone(&zone());
        assert_eq!(at_local, local(2025, 6, 2, 10, 29));
    }

    #[test]
    fn draw_exactly_at_margin_moves_to_next_day() {
        let now = local(2025, 6, 1, 10, 0);
        let at = place_in_window(&now, Window::morning(), Duration::minutes(35));
        assert_eq!(at.with_timezone(&zone()), local(2025, 6, 2, 10, 5));
    }

    #[test]
    fn draw_past_margin_stays_today() {
        let now = local(2025, 6, 1, 10, 0);
        let at = place_in_window(&now, Window::morning(), Duration::minutes(36));
        assert_eq!(at.with_timezone(&zone()), local(2025, 6, 1, 10, 6));
    }

    #[test]
    fn late_evening_pushes_both_to_tomorrow() {
        let now = local(2025, 6, 1, 21, 0);
        let times = pick_daily_times(&now, &mut StdRng::seed_from_u64(3));
        let tomorrow = local(2025, 6, 2, 0, 0).date_naive();
        assert_eq!(times.morning.with_timezone(&zone()).date_naive(), tomorrow);
        assert_eq!(times.evening.with_timezone(&zone()).date_naive(), tomorrow);
        assert!(times.morning.with_timezone(&zone()).hour() >= 9);
    }

    #[test]
    fn local_day_uses_zone_not_utc() {
        let at = Utc.with_ymd_and_hms(2025, 5, 31, 23, 0, 0).unwrap();
        assert_eq!(
            local_day(&zone(), at),
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
        );
    }
}
