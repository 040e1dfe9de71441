//! Column conversions. Postgres has no unsigned integers, and enums are
//! stored as their snake_case labels.

use std::str::FromStr;

use flightdeck_core::AppError;

pub(crate) fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Negative values only appear through manual edits; read them as zero.
pub(crate) fn from_i32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

pub(crate) fn from_i64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

pub(crate) fn parse_label<T>(column: &str, value: &str) -> Result<T, AppError>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e| AppError::DatabaseError(format!("bad {column} value in database: {e}")))
}

pub(crate) fn parse_optional<T>(column: &str, value: Option<&str>) -> Result<Option<T>, AppError>
where
    T: FromStr<Err = String>,
{
    value.map(|v| parse_label(column, v)).transpose()
}
