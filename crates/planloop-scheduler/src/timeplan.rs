//! Recurrence rules — when a plan fires, and the compact expression
//! language that encodes it.
//!
//! A rule is immutable after construction except for the volatile pair
//! (`last_executed`, `next_time`), which advance together on every
//! execution. `next_occurrence` is deterministic in its `after` argument;
//! the worker owns the clock.

use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use planloop_core::{PlanError, Result};
use serde::{Deserialize, Serialize};

use crate::sets::{MonthDaySet, MonthSet, WeekNoSet, WeekdaySet};

/// Upper bound on the month scan. A rule whose pattern can never
/// materialize (e.g. February 31st) goes dormant instead of spinning.
const MAX_MONTH_SCAN: u32 = 600;

/// Recurrence variants, with their wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanKind {
    /// Inert — never fires.
    None,
    /// Fire once at a fixed instant.
    Once,
    /// Every N days from the anchor.
    EveryDays,
    /// Every N weeks, on a set of weekdays.
    EveryWeeks,
    /// Monthly, on a set of month/day-of-month combinations.
    MonthlyDay,
    /// Monthly, on a week-ordinal + weekday combination.
    MonthlyWeek,
    /// Fired once when the worker starts.
    Startup,
    /// Fired once when the worker stops.
    Shutdown,
}

impl PlanKind {
    /// Integer tag used as the first expression field.
    pub fn tag(&self) -> u8 {
        match self {
            PlanKind::None => 0,
            PlanKind::Once => 1,
            PlanKind::EveryDays => 2,
            PlanKind::EveryWeeks => 3,
            PlanKind::MonthlyDay => 4,
            PlanKind::MonthlyWeek => 5,
            PlanKind::Startup => 6,
            PlanKind::Shutdown => 7,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PlanKind::None),
            1 => Some(PlanKind::Once),
            2 => Some(PlanKind::EveryDays),
            3 => Some(PlanKind::EveryWeeks),
            4 => Some(PlanKind::MonthlyDay),
            5 => Some(PlanKind::MonthlyWeek),
            6 => Some(PlanKind::Startup),
            7 => Some(PlanKind::Shutdown),
            _ => None,
        }
    }

    /// Whether this kind produces polled occurrences. Startup/Shutdown
    /// plans fire only through the worker's lifecycle hooks.
    pub fn is_periodic(&self) -> bool {
        matches!(
            self,
            PlanKind::Once
                | PlanKind::EveryDays
                | PlanKind::EveryWeeks
                | PlanKind::MonthlyDay
                | PlanKind::MonthlyWeek
        )
    }
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanKind::None => write!(f, "none"),
            PlanKind::Once => write!(f, "once"),
            PlanKind::EveryDays => write!(f, "every-days"),
            PlanKind::EveryWeeks => write!(f, "every-weeks"),
            PlanKind::MonthlyDay => write!(f, "monthly-day"),
            PlanKind::MonthlyWeek => write!(f, "monthly-week"),
            PlanKind::Startup => write!(f, "startup"),
            PlanKind::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A recurrence rule: one variant plus the fields that variant uses.
/// Fields outside the owning variant stay at their empty defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePlan {
    kind: PlanKind,
    start_from: NaiveDateTime,
    stop_end: Option<NaiveDateTime>,
    period: u32,
    weekdays: WeekdaySet,
    months: MonthSet,
    month_days: MonthDaySet,
    week_nos: WeekNoSet,
    last_executed: Option<NaiveDateTime>,
    next_time: Option<NaiveDateTime>,
}

impl TimePlan {
    fn base(kind: PlanKind, start_from: NaiveDateTime) -> Self {
        Self {
            kind,
            start_from,
            stop_end: None,
            period: 0,
            weekdays: WeekdaySet::EMPTY,
            months: MonthSet::EMPTY,
            month_days: MonthDaySet::EMPTY,
            week_nos: WeekNoSet::EMPTY,
            last_executed: None,
            next_time: None,
        }
    }

    /// An inert rule that never fires.
    pub fn none() -> Self {
        Self::base(PlanKind::None, NaiveDateTime::default())
    }

    /// Fires once when the worker starts.
    pub fn startup() -> Self {
        Self::base(PlanKind::Startup, NaiveDateTime::default())
    }

    /// Fires once when the worker stops.
    pub fn shutdown() -> Self {
        Self::base(PlanKind::Shutdown, NaiveDateTime::default())
    }

    /// Fires once at the given instant.
    pub fn once(at: NaiveDateTime) -> Self {
        let mut plan = Self::base(PlanKind::Once, at);
        plan.recompute(at);
        plan
    }

    /// Fires every `period` days counted from `from`.
    pub fn every_days(from: NaiveDateTime, period: u32) -> Result<Self> {
        if period == 0 {
            return Err(PlanError::invalid_argument("period must be at least 1 day"));
        }
        let mut plan = Self::base(PlanKind::EveryDays, from);
        plan.period = period;
        plan.recompute(from);
        Ok(plan)
    }

    /// Fires every `period` weeks, on the given weekdays.
    pub fn every_weeks(from: NaiveDateTime, period: u32, weekdays: WeekdaySet) -> Result<Self> {
        if period == 0 {
            return Err(PlanError::invalid_argument("period must be at least 1 week"));
        }
        if weekdays.is_empty() {
            return Err(PlanError::invalid_argument("weekday set must not be empty"));
        }
        let mut plan = Self::base(PlanKind::EveryWeeks, from);
        plan.period = period;
        plan.weekdays = weekdays;
        plan.recompute(from);
        Ok(plan)
    }

    /// Fires in the given months, on the given days of the month.
    pub fn monthly_by_day(
        from: NaiveDateTime,
        months: MonthSet,
        month_days: MonthDaySet,
    ) -> Result<Self> {
        if months.is_empty() {
            return Err(PlanError::invalid_argument("month set must not be empty"));
        }
        if month_days.is_empty() {
            return Err(PlanError::invalid_argument("day set must not be empty"));
        }
        let mut plan = Self::base(PlanKind::MonthlyDay, from);
        plan.months = months;
        plan.month_days = month_days;
        plan.recompute(from);
        Ok(plan)
    }

    /// Fires in the given months, on the given weekdays of the given
    /// week ordinals.
    pub fn monthly_by_week(
        from: NaiveDateTime,
        months: MonthSet,
        week_nos: WeekNoSet,
        weekdays: WeekdaySet,
    ) -> Result<Self> {
        if months.is_empty() {
            return Err(PlanError::invalid_argument("month set must not be empty"));
        }
        if week_nos.is_empty() {
            return Err(PlanError::invalid_argument("week ordinal set must not be empty"));
        }
        if weekdays.is_empty() {
            return Err(PlanError::invalid_argument("weekday set must not be empty"));
        }
        let mut plan = Self::base(PlanKind::MonthlyWeek, from);
        plan.months = months;
        plan.week_nos = week_nos;
        plan.weekdays = weekdays;
        plan.recompute(from);
        Ok(plan)
    }

    /// Cap the rule: no occurrence is produced at or after `stop`.
    pub fn with_stop_end(mut self, stop: NaiveDateTime) -> Self {
        self.stop_end = Some(stop);
        self.recompute(self.start_from);
        self
    }

    pub fn kind(&self) -> PlanKind {
        self.kind
    }

    pub fn start_from(&self) -> NaiveDateTime {
        self.start_from
    }

    pub fn stop_end(&self) -> Option<NaiveDateTime> {
        self.stop_end
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn weekdays(&self) -> WeekdaySet {
        self.weekdays
    }

    pub fn months(&self) -> MonthSet {
        self.months
    }

    pub fn month_days(&self) -> MonthDaySet {
        self.month_days
    }

    pub fn week_nos(&self) -> WeekNoSet {
        self.week_nos
    }

    pub fn last_executed(&self) -> Option<NaiveDateTime> {
        self.last_executed
    }

    pub fn next_time(&self) -> Option<NaiveDateTime> {
        self.next_time
    }

    /// Whether the rule's cached slot falls inside the acceptance window
    /// at `now`: at most one minute late, and not yet executed for that
    /// slot. A slot missed by more than a minute is skipped, not
    /// backfilled.
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        if let Some(stop) = self.stop_end {
            if stop <= now {
                return false;
            }
        }
        let Some(next) = self.next_time else {
            return false;
        };
        if self.last_executed.is_some_and(|le| le >= next) {
            return false;
        }
        let lateness = now - next;
        lateness >= Duration::zero() && lateness <= Duration::minutes(1)
    }

    /// Record an execution at `now` and advance the cached slot.
    pub fn mark_executed(&mut self, now: NaiveDateTime) {
        self.last_executed = Some(now);
        self.recompute(now);
    }

    fn recompute(&mut self, reference: NaiveDateTime) {
        self.next_time = self.next_occurrence(reference);
    }

    /// The earliest instant at or after `after` matching this rule's
    /// pattern, or `None` if the rule is dormant (marker kinds, an
    /// exhausted `Once`, or a `stop_end` already reached).
    pub fn next_occurrence(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        if let Some(stop) = self.stop_end {
            if stop <= after {
                return None;
            }
        }
        match self.kind {
            PlanKind::Once => {
                if self.last_executed.is_some() {
                    None
                } else {
                    Some(self.start_from).filter(|t| self.before_stop(*t))
                }
            }
            PlanKind::EveryDays => self.next_every_days(after),
            PlanKind::EveryWeeks => self.next_every_weeks(after),
            PlanKind::MonthlyDay => self.next_monthly_day(after),
            PlanKind::MonthlyWeek => self.next_monthly_week(after),
            _ => None,
        }
    }

    fn before_stop(&self, t: NaiveDateTime) -> bool {
        self.stop_end.is_none_or(|stop| t < stop)
    }

    /// The "same slot as last run" bypass: a candidate landing on the
    /// calendar day of the previous execution is never re-matched.
    fn same_slot(&self, candidate: NaiveDateTime) -> bool {
        self.last_executed
            .is_some_and(|le| le.date() == candidate.date())
    }

    fn next_every_days(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let step = Duration::days(i64::from(self.period));
        let mut candidate = self.start_from;
        loop {
            candidate += step;
            if !self.before_stop(candidate) {
                return None;
            }
            if candidate >= after && !self.same_slot(candidate) {
                return Some(candidate);
            }
        }
    }

    fn next_every_weeks(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        // The remainder of the current week is scanned first, whatever
        // its alignment with the period.
        let after_day = after.weekday().num_days_from_sunday();
        for day in after_day..7 {
            if !self.weekdays.contains(day) {
                continue;
            }
            let candidate = after + Duration::days(i64::from(day - after_day));
            if candidate <= after || self.same_slot(candidate) {
                continue;
            }
            if !self.before_stop(candidate) {
                return None;
            }
            return Some(candidate);
        }

        // Period-aligned weeks, counted from the week holding the anchor.
        let after_week = sunday_of(after.date());
        let mut week = sunday_of(self.start_from.date());
        if week < after_week {
            let weeks_behind = (after_week - week).num_days() / 7;
            let period = i64::from(self.period);
            let periods = (weeks_behind + period - 1) / period;
            week = week + Duration::days(periods * 7 * i64::from(self.period));
        }
        loop {
            for day in self.weekdays.iter() {
                let candidate =
                    NaiveDateTime::new(week + Duration::days(i64::from(day)), after.time());
                if candidate <= after || self.same_slot(candidate) {
                    continue;
                }
                if !self.before_stop(candidate) {
                    return None;
                }
                return Some(candidate);
            }
            week = week + Duration::days(7 * i64::from(self.period));
        }
    }

    fn next_monthly_day(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut year = after.year();
        let mut month = after.month();
        for _ in 0..MAX_MONTH_SCAN {
            if self.months.contains(month) {
                for day in self.month_days.iter() {
                    let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                        continue;
                    };
                    let candidate = NaiveDateTime::new(date, after.time());
                    if candidate < after || self.same_slot(candidate) {
                        continue;
                    }
                    if !self.before_stop(candidate) {
                        return None;
                    }
                    return Some(candidate);
                }
            }
            (year, month) = next_month(year, month);
        }
        None
    }

    fn next_monthly_week(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut year = after.year();
        let mut month = after.month();
        for _ in 0..MAX_MONTH_SCAN {
            if self.months.contains(month) {
                let first = NaiveDate::from_ymd_opt(year, month, 1)?;
                let anchor = sunday_of(first);
                let weeks = weeks_in_month(year, month);
                let in_after_month = year == after.year() && month == after.month();
                let start_ordinal = if in_after_month {
                    week_of_month(after.date())
                } else {
                    1
                };
                for ordinal in start_ordinal..=weeks {
                    let matched = (self.week_nos.has_last() && ordinal == weeks)
                        || self.week_nos.contains(ordinal);
                    if !matched {
                        continue;
                    }
                    for day in self.weekdays.iter() {
                        let date = anchor + Duration::days(i64::from((ordinal - 1) * 7 + day));
                        // Weeks at the month edges spill into the
                        // neighbours; the month restriction still holds.
                        if date.month() != month || date.year() != year {
                            continue;
                        }
                        let candidate = NaiveDateTime::new(date, after.time());
                        if candidate < after || self.same_slot(candidate) {
                            continue;
                        }
                        if !self.before_stop(candidate) {
                            return None;
                        }
                        return Some(candidate);
                    }
                }
            }
            (year, month) = next_month(year, month);
        }
        None
    }

    /// Render the rule in the compact expression language.
    pub fn expression(&self) -> String {
        let start = fmt_datetime(self.start_from);
        let mut out = match self.kind {
            PlanKind::Once => format!("1 {start}"),
            PlanKind::EveryDays => format!("2 {start} {}", self.period),
            PlanKind::EveryWeeks => {
                format!("3 {start} {} {}", self.period, self.weekdays.to_token())
            }
            PlanKind::MonthlyDay => format!(
                "4 {start} {} {}",
                self.months.to_token(),
                self.month_days.to_token()
            ),
            PlanKind::MonthlyWeek => format!(
                "5 {start} {} {} {}",
                self.months.to_token(),
                self.week_nos.to_token(),
                self.weekdays.to_token()
            ),
            kind => kind.tag().to_string(),
        };
        if let Some(stop) = self.stop_end {
            if matches!(
                self.kind,
                PlanKind::EveryDays
                    | PlanKind::EveryWeeks
                    | PlanKind::MonthlyDay
                    | PlanKind::MonthlyWeek
            ) {
                out.push(' ');
                out.push_str(&fmt_datetime(stop));
            }
        }
        out
    }

    /// Parse a rule from the compact expression language.
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.is_empty() {
            return Err(PlanError::malformed("empty expression"));
        }
        let tag: u8 = fields[0].parse().map_err(|_| {
            PlanError::field_format(format!("plan kind tag '{}' is not a number", fields[0]))
        })?;
        let Some(kind) = PlanKind::from_tag(tag) else {
            return Err(PlanError::malformed(format!("unknown plan kind tag {tag}")));
        };
        match kind {
            PlanKind::None => Ok(Self::none()),
            PlanKind::Startup => Ok(Self::startup()),
            PlanKind::Shutdown => Ok(Self::shutdown()),
            PlanKind::Once => {
                need_fields(&fields, 3, expression)?;
                Ok(Self::once(parse_datetime(fields[1], fields[2])?))
            }
            PlanKind::EveryDays => {
                need_fields(&fields, 4, expression)?;
                let start = parse_datetime(fields[1], fields[2])?;
                let period = parse_number(fields[3], "period")?;
                let mut plan = Self::every_days(start, period)?;
                if fields.len() >= 6 {
                    plan = plan.with_stop_end(parse_datetime(fields[4], fields[5])?);
                }
                Ok(plan)
            }
            PlanKind::EveryWeeks => {
                need_fields(&fields, 5, expression)?;
                let start = parse_datetime(fields[1], fields[2])?;
                let period = parse_number(fields[3], "period")?;
                let weekdays = WeekdaySet::parse_token(fields[4])?;
                let mut plan = Self::every_weeks(start, period, weekdays)?;
                if fields.len() >= 7 {
                    plan = plan.with_stop_end(parse_datetime(fields[5], fields[6])?);
                }
                Ok(plan)
            }
            PlanKind::MonthlyDay => {
                need_fields(&fields, 5, expression)?;
                let start = parse_datetime(fields[1], fields[2])?;
                let months = MonthSet::parse_token(fields[3])?;
                let month_days = MonthDaySet::parse_token(fields[4])?;
                let mut plan = Self::monthly_by_day(start, months, month_days)?;
                if fields.len() >= 7 {
                    plan = plan.with_stop_end(parse_datetime(fields[5], fields[6])?);
                }
                Ok(plan)
            }
            PlanKind::MonthlyWeek => {
                need_fields(&fields, 6, expression)?;
                let start = parse_datetime(fields[1], fields[2])?;
                let months = MonthSet::parse_token(fields[3])?;
                let week_nos = WeekNoSet::parse_token(fields[4])?;
                let weekdays = WeekdaySet::parse_token(fields[5])?;
                let mut plan = Self::monthly_by_week(start, months, week_nos, weekdays)?;
                if fields.len() >= 8 {
                    plan = plan.with_stop_end(parse_datetime(fields[6], fields[7])?);
                }
                Ok(plan)
            }
        }
    }

    /// Order two rules by their cached next slot. `None` when either
    /// side is dormant: an unset slot is incomparable, not "after
    /// everything".
    pub fn compare_by_next_time(&self, other: &TimePlan) -> Option<std::cmp::Ordering> {
        match (self.next_time, other.next_time) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

impl fmt::Display for TimePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression())
    }
}

fn fmt_datetime(t: NaiveDateTime) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn parse_datetime(date: &str, time: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S")
        .map_err(|_| PlanError::field_format(format!("bad date/time '{date} {time}'")))
}

fn parse_number(token: &str, what: &str) -> Result<u32> {
    token
        .parse()
        .map_err(|_| PlanError::field_format(format!("{what} '{token}' is not a number")))
}

fn need_fields(fields: &[&str], n: usize, expression: &str) -> Result<()> {
    if fields.len() < n {
        return Err(PlanError::malformed(format!(
            "expression '{expression}' has {} fields, expected at least {n}",
            fields.len()
        )));
    }
    Ok(())
}

fn sunday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

/// Week ordinal of `date` within its month; week 1 holds the 1st, weeks
/// run Sunday through Saturday.
fn week_of_month(date: NaiveDate) -> u32 {
    let first = date.with_day(1).unwrap_or(date);
    ((date - sunday_of(first)).num_days() / 7 + 1) as u32
}

fn weeks_in_month(year: i32, month: u32) -> u32 {
    week_of_month(last_day_of_month(year, month))
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    (28..=31)
        .rev()
        .find_map(|d| NaiveDate::from_ymd_opt(year, month, d))
        .unwrap_or_default()
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 { (year + 1, 1) } else { (year, month + 1) }
}
