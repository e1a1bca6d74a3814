use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::predict::Pass;
use crate::scheduler::notifications::FireEvent;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// UTC plus a fixed display offset in whole hours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayZone {
    offset: FixedOffset,
}

impl DisplayZone {
    /// Offsets outside ±14 h fall back to UTC.
    pub fn from_hours(hours: i32) -> Self {
        let offset = Some(hours)
            .filter(|h| (-14..=14).contains(h))
            .and_then(|h| FixedOffset::east_opt(h * 3600))
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn format(&self, t: DateTime<Utc>) -> String {
        let utc = t.format(TIME_FORMAT);
        if self.offset.local_minus_utc() == 0 {
            return format!("{utc} UTC");
        }
        let local = t.with_timezone(&self.offset).format(TIME_FORMAT);
        format!("{utc} UTC / {local} UTC{:+}", self.offset.local_minus_utc() / 3600)
    }
}

impl Default for DisplayZone {
    fn default() -> Self {
        Self { offset: Utc.fix() }
    }
}

pub fn format_pass(pass: &Pass, zone: DisplayZone) -> String {
    format!(
        "Rise: {} (az {:.0}°)\nPeak: {}\nSet:  {} (az {:.0}°)\nMax elevation: {:.1}°, duration {} min {:02} s",
        zone.format(pass.rise),
        pass.rise_azimuth_deg,
        zone.format(pass.peak),
        zone.format(pass.set),
        pass.set_azimuth_deg,
        pass.peak_elevation_deg,
        pass.duration_seconds / 60,
        pass.duration_seconds % 60,
    )
}

pub fn format_reminder(event: &FireEvent, zone: DisplayZone) -> String {
    let minutes = (event.pass.rise - event.emitted_at).num_minutes().max(0);
    format!(
        "Reminder: {} rises in {} minute(s)!\n{}",
        event.pass.satellite,
        minutes,
        format_pass(&event.pass, zone)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_utc_and_offset() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 22, 30, 0).unwrap();
        assert_eq!(
            DisplayZone::from_hours(3).format(t),
            "2024-03-01 22:30:00 UTC / 2024-03-02 01:30:00 UTC+3"
        );
        assert_eq!(
            DisplayZone::from_hours(-5).format(t),
            "2024-03-01 22:30:00 UTC / 2024-03-01 17:30:00 UTC-5"
        );
    }

    #[test]
    fn zero_or_invalid_offset_shows_utc_only() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 22, 30, 0).unwrap();
        assert_eq!(DisplayZone::from_hours(0).format(t), "2024-03-01 22:30:00 UTC");
        assert_eq!(DisplayZone::from_hours(40), DisplayZone::default());
    }
}
