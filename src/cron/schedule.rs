//! Natural-language schedule parsing and next-run computation.
//!
//! The model's cron tool passes schedule text through verbatim ("every 5
//! minutes", "tomorrow at 9am", a raw cron expression); this module turns it
//! into either a recurring cron expression or an absolute one-shot instant,
//! interpreted in the user's timezone.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use croner::Cron;
use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSchedule {
    OneShot { at: DateTime<Utc> },
    Recurring { expr: String },
}

/// Parse a human-friendly schedule string.
///
/// Recurring shortcuts produce 5-field cron expressions; relative and
/// absolute times produce one-shots. Raw 5-field cron passes through after
/// validation.
pub fn parse_schedule(input: &str, tz: Tz, now: DateTime<Utc>) -> anyhow::Result<ParsedSchedule> {
    let input = input.trim().trim_end_matches(['.', '!', '?']).trim();
    let now_local = now.with_timezone(&tz);

    let recurring = |expr: String| Ok(ParsedSchedule::Recurring { expr });

    match input.to_lowercase().as_str() {
        "hourly" => return recurring("0 * * * *".to_string()),
        "daily" => return recurring("0 0 * * *".to_string()),
        "weekly" => return recurring("0 0 * * 0".to_string()),
        "monthly" => return recurring("0 0 1 * *".to_string()),
        _ => {}
    }

    // "every Nm" / "every 5 minutes" / "each 15 min"
    let re_minutes = Regex::new(r"(?i)^(?:every|each)\s+(\d+)\s*(?:m|min|mins|minutes?)$")?;
    if let Some(caps) = re_minutes.captures(input) {
        let n: u32 = caps[1].parse()?;
        if n == 0 || n > 59 {
            anyhow::bail!("Minutes interval must be between 1 and 59");
        }
        return recurring(format!("*/{} * * * *", n));
    }

    // "every Nh" / "every 2 hours"
    let re_hours = Regex::new(r"(?i)^(?:every|each)\s+(\d+)\s*(?:h|hrs?|hours?)$")?;
    if let Some(caps) = re_hours.captures(input) {
        let n: u32 = caps[1].parse()?;
        if n == 0 || n > 23 {
            anyhow::bail!("Hours interval must be between 1 and 23");
        }
        return recurring(format!("0 */{} * * *", n));
    }

    // "daily at 9am" / "every morning at 8am" / "every day at 14:30" /
    // "every evening at 9" (evening/night default to pm)
    let re_daily = Regex::new(
        r"(?i)^(?:daily|every\s+(?:day|morning|evening|night))\s+at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$",
    )?;
    if let Some(caps) = re_daily.captures(input) {
        let (mut hour, minute) = parse_time_captures(&caps)?;
        let lower = input.to_lowercase();
        let evening = lower.contains("evening") || lower.contains("night");
        if evening && caps.get(3).is_none() && hour < 12 {
            hour += 12;
        }
        return recurring(format!("{} {} * * *", minute, hour));
    }

    // "weekdays at 8:30"
    let re_weekdays = Regex::new(r"(?i)^weekdays?\s+at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$")?;
    if let Some(caps) = re_weekdays.captures(input) {
        let (hour, minute) = parse_time_captures(&caps)?;
        return recurring(format!("{} {} * * 1-5", minute, hour));
    }

    // "weekends at 10am"
    let re_weekends = Regex::new(r"(?i)^weekends?\s+at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$")?;
    if let Some(caps) = re_weekends.captures(input) {
        let (hour, minute) = parse_time_captures(&caps)?;
        return recurring(format!("{} {} * * 0,6", minute, hour));
    }

    // Relative one-shot: "in 2 minutes", "after 1 hour 30 minutes"
    if let Some(duration) = parse_relative_duration(input) {
        return Ok(ParsedSchedule::OneShot { at: now + duration });
    }

    // "today at 11pm" / "tonight at 23:10" / "tomorrow at 9am", user tz
    let re_day = Regex::new(
        r"(?i)^(today|tonight|tomorrow)\s+at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$",
    )?;
    if let Some(caps) = re_day.captures(input) {
        let day_kw = caps[1].to_lowercase();
        let mut hour: u32 = caps[2].parse()?;
        let minute: u32 = caps.get(3).map_or(Ok(0), |m| m.as_str().parse())?;
        if let Some(ampm) = caps.get(4) {
            let ampm = ampm.as_str().to_lowercase();
            if ampm == "pm" && hour < 12 {
                hour += 12;
            } else if ampm == "am" && hour == 12 {
                hour = 0;
            }
        }
        if hour > 23 || minute > 59 {
            anyhow::bail!("Invalid time in '{}'", input);
        }
        let base = if day_kw == "tomorrow" {
            now_local.date_naive() + chrono::Duration::days(1)
        } else {
            now_local.date_naive()
        };
        let naive = base
            .and_hms_opt(hour, minute, 0)
            .ok_or_else(|| anyhow::anyhow!("Invalid time in '{}'", input))?;
        let target = resolve_in_tz(naive, tz)
            .ok_or_else(|| anyhow::anyhow!("Time '{}' does not exist in {}", input, tz))?;
        if target <= now {
            anyhow::bail!("Schedule time '{}' is already in the past for {}", input, tz);
        }
        return Ok(ParsedSchedule::OneShot { at: target });
    }

    // Absolute datetime forms, interpreted in the user timezone.
    if let Some(target) = parse_absolute_datetime(input, tz) {
        if target <= now {
            anyhow::bail!("Schedule time '{}' is already in the past for {}", input, tz);
        }
        return Ok(ParsedSchedule::OneShot { at: target });
    }

    // Raw cron pass-through, validated with croner.
    if input.split_whitespace().count() == 5 {
        Cron::new(input)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", input, e))?;
        return recurring(input.to_string());
    }

    anyhow::bail!(
        "Unrecognized schedule '{}'. Use shortcuts like 'every 5 minutes', 'daily at 9am', \
         'in 2h', 'tomorrow at 9am', '2026-03-14 09:30', or a 5-field cron expression.",
        input
    )
}

fn parse_relative_duration(input: &str) -> Option<chrono::Duration> {
    let lower = input.to_lowercase();
    if !lower.starts_with("in ") && !lower.starts_with("after ") {
        return None;
    }

    let re = Regex::new(r"(?i)(\d+)\s*(weeks?|w|days?|d|hours?|hrs?|h|minutes?|mins?|min|m|seconds?|secs?|s)")
        .ok()?;
    let mut total = chrono::Duration::zero();
    let mut matched = false;
    for caps in re.captures_iter(input) {
        let n: i64 = caps.get(1)?.as_str().parse().ok()?;
        if n <= 0 {
            continue;
        }
        let unit = caps.get(2)?.as_str().to_lowercase();
        matched = true;
        total += if unit.starts_with('w') {
            chrono::Duration::weeks(n)
        } else if unit.starts_with('d') {
            chrono::Duration::days(n)
        } else if unit.starts_with('h') {
            chrono::Duration::hours(n)
        } else if unit.starts_with('s') {
            chrono::Duration::seconds(n)
        } else {
            chrono::Duration::minutes(n)
        };
    }

    (matched && total > chrono::Duration::zero()).then_some(total)
}

fn parse_absolute_datetime(input: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    let dt_formats = [
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
        "%m/%d/%Y %H:%M",
        "%Y-%m-%d %I:%M %p",
        "%b %d %Y %H:%M",
        "%b %d %Y %I:%M %p",
    ];
    for fmt in dt_formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
            if let Some(dt) = resolve_in_tz(naive, tz) {
                return Some(dt);
            }
        }
    }

    let date_formats = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
    for fmt in date_formats {
        if let Ok(date) = NaiveDate::parse_from_str(input, fmt) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0).and_then(|n| resolve_in_tz(n, tz)) {
                return Some(dt);
            }
        }
    }

    None
}

fn resolve_in_tz(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        chrono::LocalResult::Ambiguous(early, _) => Some(early.with_timezone(&Utc)),
        chrono::LocalResult::None => None,
    }
}

/// Extract hour and minute from regex captures with optional AM/PM.
fn parse_time_captures(caps: &regex::Captures) -> anyhow::Result<(u32, u32)> {
    let mut hour: u32 = caps[1].parse()?;
    let minute: u32 = caps.get(2).map_or(Ok(0), |m| m.as_str().parse())?;
    if let Some(ampm) = caps.get(3) {
        let ampm = ampm.as_str().to_lowercase();
        if ampm == "pm" && hour < 12 {
            hour += 12;
        } else if ampm == "am" && hour == 12 {
            hour = 0;
        }
    }
    if hour > 23 {
        anyhow::bail!("Hour must be between 0 and 23");
    }
    if minute > 59 {
        anyhow::bail!("Minute must be between 0 and 59");
    }
    Ok((hour, minute))
}

/// Next fire instant for a cron expression, evaluated in `tz` (user zone
/// when the job carries none).
pub fn next_occurrence(
    expr: &str,
    tz: Option<&str>,
    default_tz: Tz,
    after: DateTime<Utc>,
) -> anyhow::Result<DateTime<Utc>> {
    let cron: Cron = Cron::new(expr)
        .parse()
        .map_err(|e| anyhow::anyhow!("Failed to parse cron '{}': {}", expr, e))?;

    let zone: Tz = match tz {
        Some(z) => z
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown timezone '{}'", z))?,
        None => default_tz,
    };

    let local_after = after.with_timezone(&zone);
    let next = cron
        .find_next_occurrence(&local_after, false)
        .map_err(|e| anyhow::anyhow!("No next occurrence for '{}': {}", expr, e))?;
    Ok(next.with_timezone(&Utc))
}

/// Short human description of a schedule for confirmations and listings.
pub fn describe(schedule: &crate::cron::Schedule, tz: Tz) -> String {
    match schedule {
        crate::cron::Schedule::OneShot { at_ms } => {
            match Utc.timestamp_millis_opt(*at_ms).single() {
                Some(at) => format!("once at {}", at.with_timezone(&tz).format("%Y-%m-%d %H:%M")),
                None => "once (invalid time)".to_string(),
            }
        }
        crate::cron::Schedule::Recurring { expr, tz: job_tz } => match job_tz {
            Some(zone) => format!("recurring '{}' ({})", expr, zone),
            None => format!("recurring '{}'", expr),
        },
    }
}
