//! Timezone-aware cron evaluator (5-field: minute hour dom month dow),
//! plus named shortcuts (§4.H Scheduler).

use chrono::{DateTime, Datelike, Timelike, Utc};

/// Expand a named shortcut to its 5-field form. Unrecognized input is
/// returned unchanged so it falls through to the field parser.
fn expand_shortcut(cron: &str) -> &str {
    match cron.trim() {
        "@hourly" => "0 * * * *",
        "@daily" => "0 0 * * *",
        "@weekly" => "0 0 * * 0",
        "@monthly" => "0 0 1 * *",
        "@every5min" => "*/5 * * * *",
        "@every15min" => "*/15 * * * *",
        "@every30min" => "*/30 * * * *",
        other => other,
    }
}

pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

fn cron_field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value.is_multiple_of(n);
        }
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(n) = part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

fn cron_matches_naive(cron: &str, dt: &chrono::NaiveDateTime) -> bool {
    let cron = expand_shortcut(cron);
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    cron_field_matches(fields[0], dt.minute())
        && cron_field_matches(fields[1], dt.hour())
        && cron_field_matches(fields[2], dt.day())
        && cron_field_matches(fields[3], dt.month())
        && cron_field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

/// Does the given UTC instant match `cron` when evaluated in `tz`? Used
/// by the scheduler tick, which compares against the current minute.
pub fn cron_matches_tz(cron: &str, dt: &DateTime<Utc>, tz: chrono_tz::Tz) -> bool {
    cron_matches_naive(cron, &dt.with_timezone(&tz).naive_local())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn named_shortcuts_expand() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
        assert!(cron_matches_tz("@daily", &dt, chrono_tz::UTC));
        let dt_midday = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        assert!(!cron_matches_tz("@daily", &dt_midday, chrono_tz::UTC));
    }

    #[test]
    fn every_5_min_shortcut() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 15, 10, 15, 0).unwrap();
        assert!(cron_matches_tz("@every5min", &dt, chrono_tz::UTC));
        let dt2 = Utc.with_ymd_and_hms(2024, 6, 15, 10, 17, 0).unwrap();
        assert!(!cron_matches_tz("@every5min", &dt2, chrono_tz::UTC));
    }

    #[test]
    fn raw_field_step_and_range() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        assert!(cron_matches_tz("0 9-17 * * *", &dt, chrono_tz::UTC));
        let dt2 = Utc.with_ymd_and_hms(2024, 6, 15, 20, 0, 0).unwrap();
        assert!(!cron_matches_tz("0 9-17 * * *", &dt2, chrono_tz::UTC));
    }

    #[test]
    fn timezone_shifts_the_match() {
        // 09:00 US/Eastern (EDT, UTC-4) is 13:00 UTC.
        let dt = Utc.with_ymd_and_hms(2024, 6, 15, 13, 0, 0).unwrap();
        assert!(cron_matches_tz("0 9 * * *", &dt, parse_tz("US/Eastern")));
        assert!(!cron_matches_tz("0 9 * * *", &dt, chrono_tz::UTC));
    }

    #[test]
    fn comma_list() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 15, 10, 15, 0).unwrap();
        assert!(cron_matches_tz("0,15,30,45 * * * *", &dt, chrono_tz::UTC));
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert_eq!(parse_tz("Not/Real"), chrono_tz::UTC);
    }
}
