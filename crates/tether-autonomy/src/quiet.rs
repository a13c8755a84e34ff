use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Timelike, Utc};
use tether_config::schema::AutonomyConfig;

/// A daily window, in local time, during which no wake-up may fire.
///
/// `start_hour` is inclusive and `end_hour` exclusive. A window with
/// `start_hour > end_hour` wraps past midnight; equal hours mean no window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    start_hour: u32,
    end_hour: u32,
    offset: FixedOffset,
}

impl QuietHours {
    pub fn new(start_hour: u8, end_hour: u8, utc_offset_hours: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
        Self {
            start_hour: u32::from(start_hour.min(23)),
            end_hour: u32::from(end_hour.min(23)),
            offset,
        }
    }

    pub fn from_config(config: &AutonomyConfig) -> Self {
        Self::new(
            config.quiet_start_hour,
            config.quiet_end_hour,
            config.utc_offset_hours,
        )
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let hour = t.with_timezone(&self.offset).hour();
        match self.start_hour.cmp(&self.end_hour) {
            std::cmp::Ordering::Equal => false,
            std::cmp::Ordering::Less => hour >= self.start_hour && hour < self.end_hour,
            std::cmp::Ordering::Greater => hour >= self.start_hour || hour < self.end_hour,
        }
    }

    /// The first instant at or after `t` that lies outside the window.
    pub fn next_active(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        if !self.contains(t) {
            return t;
        }
        let local = t.with_timezone(&self.offset);
        let Some(end_today) = local.date_naive().and_hms_opt(self.end_hour, 0, 0) else {
            return t;
        };
        let end = if end_today > local.naive_local() {
            end_today
        } else {
            end_today + Duration::days(1)
        };
        self.offset
            .from_local_datetime(&end)
            .single()
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(t)
    }
}
