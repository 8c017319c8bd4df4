//! Business-hours and holiday gate
//!
//! Campaign pacing respects the tenant's calendar: outside the configured
//! windows (or on a holiday) the runner sleeps until the next open
//! boundary. A tenant with no configured windows is always open.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDateTime, Utc};
use flowchat_common::types::TenantId;
use flowchat_storage::models::{BusinessHours, Holiday, Tenant};
use flowchat_storage::repository::CalendarRepository;

/// How far ahead the boundary search looks before giving up
const BOUNDARY_SEARCH_DAYS: i64 = 14;

/// Whether the tenant calendar is open at `at`
pub(crate) fn is_open_at(
    windows: &[BusinessHours],
    holidays: &[Holiday],
    utc_offset_minutes: i32,
    at: DateTime<Utc>,
) -> bool {
    if windows.is_empty() {
        return true;
    }

    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    let local = at.with_timezone(&offset);
    let local_date = local.date_naive();

    if holidays.iter().any(|h| h.day == local_date) {
        return false;
    }

    let weekday = local_date.weekday().num_days_from_monday() as i16;
    let time = local.time();

    windows
        .iter()
        .any(|w| w.weekday == weekday && w.enabled && w.opens_at <= time && time < w.closes_at)
}

/// The next instant at or after `from` when the calendar is open. Returns
/// None when no window opens inside the search horizon.
pub(crate) fn next_open_boundary(
    windows: &[BusinessHours],
    holidays: &[Holiday],
    utc_offset_minutes: i32,
    from: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if windows.is_empty() {
        return Some(from);
    }
    if is_open_at(windows, holidays, utc_offset_minutes, from) {
        return Some(from);
    }

    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    let local_from = from.with_timezone(&offset);

    for day_offset in 0..=BOUNDARY_SEARCH_DAYS {
        let date = local_from.date_naive() + Duration::days(day_offset);
        if holidays.iter().any(|h| h.day == date) {
            continue;
        }

        let weekday = date.weekday().num_days_from_monday() as i16;
        let mut candidates: Vec<_> = windows
            .iter()
            .filter(|w| w.weekday == weekday && w.enabled)
            .collect();
        candidates.sort_by_key(|w| w.opens_at);

        for window in candidates {
            let opens = NaiveDateTime::new(date, window.opens_at);
            let opens_utc = opens
                .and_local_timezone(offset)
                .single()?
                .with_timezone(&Utc);
            let closes = NaiveDateTime::new(date, window.closes_at);
            let closes_utc = closes
                .and_local_timezone(offset)
                .single()?
                .with_timezone(&Utc);

            if closes_utc <= from {
                continue;
            }
            return Some(opens_utc.max(from));
        }
    }

    None
}

/// Calendar gate bound to the repository
#[derive(Clone)]
pub struct BusinessCalendar {
    repo: CalendarRepository,
}

impl BusinessCalendar {
    /// Create a new calendar gate
    pub fn new(repo: CalendarRepository) -> Self {
        Self { repo }
    }

    /// Whether the tenant is currently inside its send window
    pub async fn is_open_now(&self, tenant: &Tenant) -> Result<bool, sqlx::Error> {
        let windows = self.repo.business_hours(tenant.id).await?;
        let holidays = self.holiday_horizon(tenant.id).await?;
        Ok(is_open_at(
            &windows,
            &holidays,
            tenant.utc_offset_minutes,
            Utc::now(),
        ))
    }

    /// The next open instant for the tenant, from now
    pub async fn next_open(
        &self,
        tenant: &Tenant,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        let windows = self.repo.business_hours(tenant.id).await?;
        let holidays = self.holiday_horizon(tenant.id).await?;
        Ok(next_open_boundary(
            &windows,
            &holidays,
            tenant.utc_offset_minutes,
            Utc::now(),
        ))
    }

    async fn holiday_horizon(&self, tenant_id: TenantId) -> Result<Vec<Holiday>, sqlx::Error> {
        let today = Utc::now().date_naive() - Duration::days(1);
        let horizon = today + Duration::days(BOUNDARY_SEARCH_DAYS + 2);
        self.repo.holidays_between(tenant_id, today, horizon).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use uuid::Uuid;

    fn window(weekday: i16, opens: &str, closes: &str) -> BusinessHours {
        BusinessHours {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            weekday,
            opens_at: opens.parse::<NaiveTime>().unwrap(),
            closes_at: closes.parse::<NaiveTime>().unwrap(),
            enabled: true,
        }
    }

    fn holiday(day: &str) -> Holiday {
        Holiday {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            day: day.parse().unwrap(),
            name: "feriado".to_string(),
        }
    }

    #[test]
    fn test_no_windows_is_always_open() {
        let at = "2024-06-10T03:00:00Z".parse().unwrap();
        assert!(is_open_at(&[], &[], 0, at));
    }

    #[test]
    fn test_open_inside_window() {
        // 2024-06-10 is a Monday
        let windows = [window(0, "09:00:00", "18:00:00")];
        assert!(is_open_at(
            &windows,
            &[],
            0,
            "2024-06-10T10:00:00Z".parse().unwrap()
        ));
        assert!(!is_open_at(
            &windows,
            &[],
            0,
            "2024-06-10T19:00:00Z".parse().unwrap()
        ));
    }

    #[test]
    fn test_offset_shifts_the_window() {
        // 11:30 UTC is 08:30 at UTC-3, before opening
        let windows = [window(0, "09:00:00", "18:00:00")];
        assert!(!is_open_at(
            &windows,
            &[],
            -180,
            "2024-06-10T11:30:00Z".parse().unwrap()
        ));
        // 12:30 UTC is 09:30 local
        assert!(is_open_at(
            &windows,
            &[],
            -180,
            "2024-06-10T12:30:00Z".parse().unwrap()
        ));
    }

    #[test]
    fn test_holiday_closes_the_day() {
        let windows = [window(0, "09:00:00", "18:00:00")];
        let holidays = [holiday("2024-06-10")];
        assert!(!is_open_at(
            &windows,
            &holidays,
            0,
            "2024-06-10T10:00:00Z".parse().unwrap()
        ));
    }

    #[test]
    fn test_next_boundary_same_day() {
        let windows = [window(0, "09:00:00", "18:00:00")];
        let from = "2024-06-10T07:00:00Z".parse().unwrap();
        let boundary = next_open_boundary(&windows, &[], 0, from).unwrap();
        assert_eq!(boundary, "2024-06-10T09:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_next_boundary_skips_holiday_to_next_window() {
        let windows = [
            window(0, "09:00:00", "18:00:00"),
            window(1, "09:00:00", "18:00:00"),
        ];
        let holidays = [holiday("2024-06-10")];
        let from = "2024-06-10T07:00:00Z".parse().unwrap();
        let boundary = next_open_boundary(&windows, &holidays, 0, from).unwrap();
        // Tuesday's opening
        assert_eq!(boundary, "2024-06-11T09:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_already_open_returns_from() {
        let windows = [window(0, "09:00:00", "18:00:00")];
        let from: DateTime<Utc> = "2024-06-10T10:00:00Z".parse().unwrap();
        assert_eq!(next_open_boundary(&windows, &[], 0, from), Some(from));
    }
}
