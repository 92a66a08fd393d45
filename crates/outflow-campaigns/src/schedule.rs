use chrono::{DateTime, Duration, Timelike, Utc};

use crate::error::{CampaignError, Result};
use crate::types::CampaignStep;

/// Tenant-local time-of-day window, half-open (`start` inclusive, `end`
/// exclusive). A window whose start is after its end wraps midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendWindow {
    start_minute: u32,
    end_minute: u32,
}

impl SendWindow {
    /// Parse `"HH:MM-HH:MM"`.
    pub fn parse(s: &str) -> Result<Self> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| CampaignError::InvalidSendWindow(s.to_string()))?;
        Ok(Self {
            start_minute: parse_hhmm(start)
                .ok_or_else(|| CampaignError::InvalidSendWindow(s.to_string()))?,
            end_minute: parse_hhmm(end)
                .ok_or_else(|| CampaignError::InvalidSendWindow(s.to_string()))?,
        })
    }

    fn contains(&self, minute_of_day: u32) -> bool {
        if self.start_minute <= self.end_minute {
            minute_of_day >= self.start_minute && minute_of_day < self.end_minute
        } else {
            // Wraps midnight, e.g. 22:00-06:00.
            minute_of_day >= self.start_minute || minute_of_day < self.end_minute
        }
    }
}

fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// First-step stagger: `base, base+k, base+2k, …` in recipient creation
/// order. The sole pacing tool across recipients of one campaign.
pub fn stagger_times(
    base: DateTime<Utc>,
    count: usize,
    interval_seconds: i64,
) -> Vec<DateTime<Utc>> {
    (0..count)
        .map(|i| base + Duration::seconds(interval_seconds * i as i64))
        .collect()
}

/// The delay a step applies relative to the previous step's completion.
pub fn step_delay(step: &CampaignStep) -> Duration {
    Duration::days(step.delay_days)
        + Duration::hours(step.delay_hours)
        + Duration::minutes(step.delay_minutes)
}

/// Resolve the earliest permissible send instant: `max(now, next_action_at)`
/// snapped forward to the next opening of the step's tenant-local window.
pub fn resolve_send_time(
    now: DateTime<Utc>,
    next_action_at: Option<DateTime<Utc>>,
    window: Option<SendWindow>,
    tenant_offset_minutes: i32,
) -> DateTime<Utc> {
    let candidate = match next_action_at {
        Some(t) if t > now => t,
        _ => now,
    };
    let Some(window) = window else {
        return candidate;
    };

    let local = candidate + Duration::minutes(tenant_offset_minutes as i64);
    let minute_of_day = local.hour() * 60 + local.minute();
    if window.contains(minute_of_day) {
        return candidate;
    }

    // Snap to the next opening: today if still ahead, else tomorrow.
    let day_start = local
        - Duration::minutes(minute_of_day as i64)
        - Duration::seconds(local.second() as i64)
        - Duration::nanoseconds(local.nanosecond() as i64);
    let mut opening = day_start + Duration::minutes(window.start_minute as i64);
    if opening <= local {
        opening += Duration::days(1);
    }
    opening - Duration::minutes(tenant_offset_minutes as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
    }

    #[test]
    fn stagger_is_an_arithmetic_progression() {
        let base = at(9, 0);
        let times = stagger_times(base, 4, 10);
        assert_eq!(times.len(), 4);
        for (i, t) in times.iter().enumerate() {
            assert_eq!((*t - base).num_seconds(), 10 * i as i64);
        }
    }

    #[test]
    fn zero_interval_collapses_the_stagger() {
        let base = at(9, 0);
        assert!(stagger_times(base, 3, 0).iter().all(|t| *t == base));
    }

    #[test]
    fn step_delay_sums_components() {
        let step = CampaignStep {
            id: "s".into(),
            campaign_id: "c".into(),
            step_order: 2,
            channel_kind: outflow_core::ChannelKind::EmailSmtp,
            channel_config_id: "cfg".into(),
            template_id: "t".into(),
            delay_days: 1,
            delay_hours: 2,
            delay_minutes: 30,
            send_time: None,
        };
        assert_eq!(step_delay(&step).num_minutes(), 24 * 60 + 2 * 60 + 30);
    }

    #[test]
    fn window_parse_rejects_garbage() {
        assert!(SendWindow::parse("09:00-17:00").is_ok());
        assert!(SendWindow::parse("9am-5pm").is_err());
        assert!(SendWindow::parse("25:00-17:00").is_err());
        assert!(SendWindow::parse("09:00").is_err());
    }

    #[test]
    fn inside_window_fires_immediately() {
        let w = SendWindow::parse("09:00-17:00").unwrap();
        let now = at(10, 30);
        assert_eq!(resolve_send_time(now, None, Some(w), 0), now);
    }

    #[test]
    fn before_window_snaps_to_opening() {
        let w = SendWindow::parse("09:00-17:00").unwrap();
        let now = at(6, 0);
        assert_eq!(resolve_send_time(now, None, Some(w), 0), at(9, 0));
    }

    #[test]
    fn after_window_snaps_to_tomorrow() {
        let w = SendWindow::parse("09:00-17:00").unwrap();
        let now = at(18, 0);
        let resolved = resolve_send_time(now, None, Some(w), 0);
        assert_eq!(resolved, at(9, 0) + Duration::days(1));
    }

    #[test]
    fn tenant_offset_shifts_the_window() {
        // 09:00-17:00 at UTC+120min == 07:00-15:00 UTC.
        let w = SendWindow::parse("09:00-17:00").unwrap();
        let now = at(6, 0);
        assert_eq!(resolve_send_time(now, None, Some(w), 120), at(7, 0));
        // 16:00 UTC = 18:00 local — already past the window.
        let evening = at(16, 0);
        let resolved = resolve_send_time(evening, None, Some(w), 120);
        assert_eq!(resolved, at(7, 0) + Duration::days(1));
    }

    #[test]
    fn future_next_action_dominates_now() {
        let now = at(10, 0);
        let later = at(12, 0);
        assert_eq!(resolve_send_time(now, Some(later), None, 0), later);
        assert_eq!(resolve_send_time(now, Some(at(8, 0)), None, 0), now);
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let w = SendWindow::parse("22:00-06:00").unwrap();
        assert_eq!(resolve_send_time(at(23, 0), None, Some(w), 0), at(23, 0));
        assert_eq!(resolve_send_time(at(3, 0), None, Some(w), 0), at(3, 0));
        assert_eq!(resolve_send_time(at(12, 0), None, Some(w), 0), at(22, 0));
    }
}
