//! Fixed-width bit sets for recurrence rule fields.
//!
//! Each set is a newtype over a small integer with named accessors, plus
//! the expression-token codec shared by all of them: `A` means every
//! value, `L` is the distinguished last-week sentinel, and anything else
//! is a `/`-separated integer list.

use chrono::Weekday;
use planloop_core::{PlanError, Result};
use serde::{Deserialize, Serialize};

/// Weekdays a rule may fire on. Sunday is bit 0, Saturday is bit 6.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(0x7F);

    /// Build a set from chrono weekdays.
    pub fn of(days: &[Weekday]) -> Self {
        let mut set = Self::EMPTY;
        for d in days {
            set.insert(d.num_days_from_sunday());
        }
        set
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Membership by day index, 0 = Sunday .. 6 = Saturday.
    pub fn contains(&self, day: u32) -> bool {
        day < 7 && self.0 & (1 << day) != 0
    }

    /// Insert a day index; out-of-range values are ignored.
    pub fn insert(&mut self, day: u32) {
        if day < 7 {
            self.0 |= 1 << day;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_all(&self) -> bool {
        self.0 == Self::ALL.0
    }

    /// Day indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..7).filter(|d| self.contains(*d))
    }

    pub(crate) fn to_token(&self) -> String {
        if self.is_all() {
            return "A".into();
        }
        let days: Vec<String> = self.iter().map(|d| d.to_string()).collect();
        days.join("/")
    }

    pub(crate) fn parse_token(token: &str) -> Result<Self> {
        if token == "A" {
            return Ok(Self::ALL);
        }
        let mut set = Self::EMPTY;
        for part in token.split('/') {
            let day: u32 = part
                .parse()
                .map_err(|_| PlanError::field_format(format!("weekday '{part}' is not a number")))?;
            if day > 6 {
                return Err(PlanError::field_format(format!(
                    "weekday {day} out of range 0..=6"
                )));
            }
            set.insert(day);
        }
        Ok(set)
    }
}

impl std::ops::BitOr for WeekdaySet {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Months a rule may fire in. January is bit 0, December is bit 11.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthSet(u16);

impl MonthSet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(0x0FFF);

    /// Build a set from month numbers, 1 = January .. 12 = December.
    pub fn of(months: &[u32]) -> Self {
        let mut set = Self::EMPTY;
        for m in months {
            set.insert(*m);
        }
        set
    }

    pub fn from_bits(bits: u16) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    /// Membership by month number 1..=12.
    pub fn contains(&self, month: u32) -> bool {
        (1..=12).contains(&month) && self.0 & (1 << (month - 1)) != 0
    }

    /// Insert a month number; out-of-range values are ignored.
    pub fn insert(&mut self, month: u32) {
        if (1..=12).contains(&month) {
            self.0 |= 1 << (month - 1);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_all(&self) -> bool {
        self.0 == Self::ALL.0
    }

    /// Month numbers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=12).filter(|m| self.contains(*m))
    }

    pub(crate) fn to_token(&self) -> String {
        if self.is_all() {
            return "A".into();
        }
        let months: Vec<String> = self.iter().map(|m| m.to_string()).collect();
        months.join("/")
    }

    pub(crate) fn parse_token(token: &str) -> Result<Self> {
        if token == "A" {
            return Ok(Self::ALL);
        }
        let mut set = Self::EMPTY;
        for part in token.split('/') {
            let month: u32 = part
                .parse()
                .map_err(|_| PlanError::field_format(format!("month '{part}' is not a number")))?;
            if !(1..=12).contains(&month) {
                return Err(PlanError::field_format(format!(
                    "month {month} out of range 1..=12"
                )));
            }
            set.insert(month);
        }
        Ok(set)
    }
}

impl std::ops::BitOr for MonthSet {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Days of the month a rule may fire on. Day 1 is bit 0, day 31 is bit 30.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthDaySet(u32);

impl MonthDaySet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(0x7FFF_FFFF);

    /// Build a set from day numbers, 1..=31.
    pub fn of(days: &[u32]) -> Self {
        let mut set = Self::EMPTY;
        for d in days {
            set.insert(*d);
        }
        set
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Membership by day number 1..=31.
    pub fn contains(&self, day: u32) -> bool {
        (1..=31).contains(&day) && self.0 & (1 << (day - 1)) != 0
    }

    /// Insert a day number; out-of-range values are ignored.
    pub fn insert(&mut self, day: u32) {
        if (1..=31).contains(&day) {
            self.0 |= 1 << (day - 1);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_all(&self) -> bool {
        self.0 == Self::ALL.0
    }

    /// Day numbers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=31).filter(|d| self.contains(*d))
    }

    pub(crate) fn to_token(&self) -> String {
        if self.is_all() {
            return "A".into();
        }
        let days: Vec<String> = self.iter().map(|d| d.to_string()).collect();
        days.join("/")
    }

    pub(crate) fn parse_token(token: &str) -> Result<Self> {
        if token == "A" {
            return Ok(Self::ALL);
        }
        let mut set = Self::EMPTY;
        for part in token.split('/') {
            let day: u32 = part.parse().map_err(|_| {
                PlanError::field_format(format!("day-of-month '{part}' is not a number"))
            })?;
            if !(1..=31).contains(&day) {
                return Err(PlanError::field_format(format!(
                    "day-of-month {day} out of range 1..=31"
                )));
            }
            set.insert(day);
        }
        Ok(set)
    }
}

impl std::ops::BitOr for MonthDaySet {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Week ordinals within a month. Ordinals 1..=6 occupy bits 0..=5; the
/// distinguished "last week" sentinel lives at bit 7, outside the
/// ordinal range, so a month's final week matches it whatever its number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekNoSet(u8);

impl WeekNoSet {
    pub const EMPTY: Self = Self(0);
    pub const LAST: Self = Self(0x80);
    pub const ALL: Self = Self(0xBF);

    /// Build a set from ordinals, 1..=6.
    pub fn of(ordinals: &[u32]) -> Self {
        let mut set = Self::EMPTY;
        for n in ordinals {
            set.insert(*n);
        }
        set
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Membership by ordinal 1..=6. The last-week sentinel is queried
    /// separately via [`WeekNoSet::has_last`].
    pub fn contains(&self, ordinal: u32) -> bool {
        (1..=6).contains(&ordinal) && self.0 & (1 << (ordinal - 1)) != 0
    }

    /// Insert an ordinal; out-of-range values are ignored.
    pub fn insert(&mut self, ordinal: u32) {
        if (1..=6).contains(&ordinal) {
            self.0 |= 1 << (ordinal - 1);
        }
    }

    pub fn has_last(&self) -> bool {
        self.0 & Self::LAST.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_all(&self) -> bool {
        self.0 == Self::ALL.0
    }

    /// Ordinals in ascending order, without the last-week sentinel.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=6).filter(|n| self.contains(*n))
    }

    pub(crate) fn to_token(&self) -> String {
        if self.is_all() {
            return "A".into();
        }
        let mut parts: Vec<String> = self.iter().map(|n| n.to_string()).collect();
        if self.has_last() {
            parts.push("L".into());
        }
        parts.join("/")
    }

    pub(crate) fn parse_token(token: &str) -> Result<Self> {
        if token == "A" {
            return Ok(Self::ALL);
        }
        let mut set = Self::EMPTY;
        for part in token.split('/') {
            if part == "L" {
                set = set | Self::LAST;
                continue;
            }
            let ordinal: u32 = part.parse().map_err(|_| {
                PlanError::field_format(format!("week ordinal '{part}' is not a number"))
            })?;
            if !(1..=6).contains(&ordinal) {
                return Err(PlanError::field_format(format!(
                    "week ordinal {ordinal} out of range 1..=6"
                )));
            }
            set.insert(ordinal);
        }
        Ok(set)
    }
}

impl std::ops::BitOr for WeekNoSet {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
