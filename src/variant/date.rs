//! OLE automation dates.
//!
//! A DATE is a day count from 1899-12-30 with the time of day in the fractional part. Before the
//! epoch the integer part goes negative while the fraction still counts forward from midnight,
//! so -1.25 is 1899-12-29 06:00.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};

use super::binding::{GetVariant, SetVariant};
use super::safe::{kind, Date};
use super::Variant;
use crate::error::{AutomationError, Result};
use crate::sys::{HResult, VarType};

/// 0100-01-01 00:00:00
pub const MIN_OLE_DATE: f64 = -657_434.0;
/// 9999-12-31 23:59:59
pub const MAX_OLE_DATE: f64 = 2_958_465.999_988_426;

const MS_PER_DAY: i64 = 86_400_000;

fn epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)
}

/// Converts to a DATE, millisecond precision. `None` outside years 100 through 9999.
pub fn to_ole_date(value: NaiveDateTime) -> Option<f64> {
    let millis = (value - epoch()?).num_milliseconds();
    let days = millis.div_euclid(MS_PER_DAY);
    let time = millis.rem_euclid(MS_PER_DAY) as f64 / MS_PER_DAY as f64;
    let ole = if days < 0 {
        days as f64 - time
    } else {
        days as f64 + time
    };
    (MIN_OLE_DATE..=MAX_OLE_DATE).contains(&ole).then_some(ole)
}

pub fn from_ole_date(value: f64) -> Option<NaiveDateTime> {
    if !value.is_finite() || !(MIN_OLE_DATE..=MAX_OLE_DATE).contains(&value) {
        return None;
    }
    let days = value.trunc();
    let millis = ((value - days).abs() * MS_PER_DAY as f64).round() as i64;
    epoch()?
        .checked_add_signed(Duration::try_days(days as i64)?)?
        .checked_add_signed(Duration::try_milliseconds(millis)?)
}

/// Accepts ISO 8601 date or date-time text and US `m/d/Y`.
pub fn parse_ole_date(text: &str) -> Option<f64> {
    let text = text.trim();
    const DATE_TIMES: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M:%S"];
    const DATES: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];
    let parsed = DATE_TIMES
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DATES
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;
    to_ole_date(parsed)
}

pub fn format_ole_date(value: f64) -> Option<String> {
    let moment = from_ole_date(value)?;
    if moment.num_seconds_from_midnight() == 0 {
        Some(moment.format("%Y-%m-%d").to_string())
    } else {
        Some(moment.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

impl Date {
    pub fn from_naive(value: NaiveDateTime) -> Option<Self> {
        to_ole_date(value).map(Date::new)
    }

    pub fn to_naive(self) -> Option<NaiveDateTime> {
        from_ole_date(self.get())
    }
}

impl SetVariant for NaiveDateTime {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        let days = to_ole_date(self).ok_or(AutomationError::Coercion {
            from: VarType::DATE,
            to: VarType::DATE,
            code: HResult::DISP_E_OVERFLOW,
        })?;
        variant.store::<kind::Date>(days);
        Ok(())
    }
}

impl GetVariant for NaiveDateTime {
    fn get_from(variant: &mut Variant) -> Result<Self> {
        let days = variant.load::<kind::Date>()?;
        from_ole_date(days).ok_or(AutomationError::Coercion {
            from: VarType::DATE,
            to: VarType::DATE,
            code: HResult::DISP_E_OVERFLOW,
        })
    }
}
