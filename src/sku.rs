//! Product SKU decoding.
//!
//! Course products in the shop carry their schedule in the SKU, for example
//! `TANF-ALAPSORF-4H-202505100058`: a `-<hours>H-` duration segment and a
//! trailing `YYYYMMDDHHMM` start stamp.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-([0-9]+)H-").expect("valid duration pattern"));
static START_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-([0-9]{12})$").expect("valid start pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SkuSchedule {
    pub start: Option<NaiveDateTime>,
    pub duration_hours: Option<u32>,
}

pub fn parse_sku(sku: &str) -> SkuSchedule {
    let duration_hours = DURATION_RE
        .captures(sku)
        .and_then(|caps| caps[1].parse::<u32>().ok());

    let start = START_RE
        .captures(sku)
        .and_then(|caps| parse_stamp(&caps[1]));

    SkuSchedule { start, duration_hours }
}

// YYYYMMDDHHMM; START_RE only admits ASCII digits, so byte slicing is safe.
fn parse_stamp(stamp: &str) -> Option<NaiveDateTime> {
    let year = stamp[0..4].parse::<i32>().ok()?;
    let month = stamp[4..6].parse::<u32>().ok()?;
    let day = stamp[6..8].parse::<u32>().ok()?;
    let hour = stamp[8..10].parse::<u32>().ok()?;
    let minute = stamp[10..12].parse::<u32>().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)
}
