use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};

/// A parsed cron expression, evaluated in UTC.
///
/// Accepts the classic 5-field crontab form (`min hour dom month dow`, with
/// Sunday as 0 or 7) as well as the 6/7-field seconds-first form understood
/// by the `cron` crate.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    inner: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let normalised = normalise(expression);
        let inner = cron::Schedule::from_str(&normalised).map_err(|e| {
            SchedulerError::InvalidSchedule {
                expression: expression.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { inner })
    }

    /// First fire time strictly after `after`, or `None` if the schedule
    /// never fires again (e.g. a year field entirely in the past).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&after).find(|t| *t > after)
    }
}

/// Compute the next fire time of `expression` strictly after `reference`.
///
/// Pure and deterministic: no clock reads, no shared state.
pub fn next_trigger(expression: &str, reference: DateTime<Utc>) -> Result<DateTime<Utc>> {
    CronSchedule::parse(expression)?
        .next_after(reference)
        .ok_or_else(|| SchedulerError::InvalidSchedule {
            expression: expression.to_string(),
            reason: "no future occurrence".to_string(),
        })
}

/// Turn a 5-field crontab line into the seconds-first form.
///
/// The `cron` crate numbers weekdays 1 (Sunday) to 7 (Saturday) while crontab
/// uses 0 (or 7) for Sunday, so numeric weekday values are shifted by one.
fn normalise(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return fields.join(" ");
    }
    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        shift_weekdays(fields[4])
    )
}

fn shift_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (base, step) = match item.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (item, None),
            };
            let base = match base.split_once('-') {
                Some((lo, hi)) => match (shift_day(lo), hi.parse::<u8>()) {
                    // "5-7" runs Friday through Sunday; Sunday wraps to 1.
                    (lo, Ok(7)) if step.is_none() => format!("{lo}-7,1"),
                    (lo, _) => format!("{lo}-{}", shift_day(hi)),
                },
                None => shift_day(base),
            };
            match step {
                Some(step) => format!("{base}/{step}"),
                None => base,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn shift_day(token: &str) -> String {
    match token.parse::<u8>() {
        Ok(7) => "1".to_string(),
        Ok(n) => (n + 1).to_string(),
        Err(_) => token.to_string(),
    }
}
