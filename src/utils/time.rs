use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;

use crate::models::{Learner, TimeOfDay};

/// Resolves the learner's zone, falling back to `default_zone` and then UTC.
pub fn learner_timezone(learner: &Learner, default_zone: &str) -> Tz {
    learner
        .timezone
        .as_deref()
        .and_then(|zone| zone.parse::<Tz>().ok())
        .or_else(|| default_zone.parse::<Tz>().ok())
        .unwrap_or(Tz::UTC)
}

pub fn local_date(ts: DateTime<Utc>, tz: Tz) -> NaiveDate {
    ts.with_timezone(&tz).date_naive()
}

pub fn time_of_day(ts: DateTime<Utc>, tz: Tz) -> TimeOfDay {
    TimeOfDay::from_hour(ts.with_timezone(&tz).hour())
}
