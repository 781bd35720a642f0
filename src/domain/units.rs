use anyhow::{anyhow, Error};

/// Raw value standing for "no limit". Never scaled in either direction.
pub const UNLIMITED: i64 = -1;

pub const MEMORY_UNITS: [(&str, i64); 4] = [
    ("bytes", 1),
    ("KiB", 1024),
    ("MiB", 1024 * 1024),
    ("GiB", 1024 * 1024 * 1024),
];

pub const TIME_UNITS: [(&str, i64); 5] = [
    ("ns", 1),
    ("us", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("h", 3_600 * 1_000_000_000),
];

pub const DEFAULT_MEMORY_UNIT: &str = "bytes";
pub const DEFAULT_TIME_UNIT: &str = "s";

fn multiplier(table: &[(&str, i64)], unit: &str) -> Result<i64, Error> {
    table
        .iter()
        .find(|(label, _)| *label == unit)
        .map(|(_, factor)| *factor)
        .ok_or(anyhow!("Unknown unit {}", unit))
}

fn scale_up(table: &[(&str, i64)], amount: i64, unit: &str) -> Result<i64, Error> {
    if amount == UNLIMITED {
        return Ok(UNLIMITED);
    }
    amount
        .checked_mul(multiplier(table, unit)?)
        .ok_or(anyhow!("{} {} does not fit in 64 bits", amount, unit))
}

fn scale_down(table: &[(&str, i64)], raw: i64, unit: &str) -> Result<i64, Error> {
    if raw == UNLIMITED {
        return Ok(UNLIMITED);
    }
    Ok(raw / multiplier(table, unit)?)
}

pub fn to_bytes(amount: i64, unit: &str) -> Result<i64, Error> {
    scale_up(&MEMORY_UNITS, amount, unit)
}

/// Integer division, truncating toward zero.
pub fn from_bytes(bytes: i64, unit: &str) -> Result<i64, Error> {
    scale_down(&MEMORY_UNITS, bytes, unit)
}

pub fn to_nanos(amount: i64, unit: &str) -> Result<i64, Error> {
    scale_up(&TIME_UNITS, amount, unit)
}

pub fn from_nanos(nanos: i64, unit: &str) -> Result<i64, Error> {
    scale_down(&TIME_UNITS, nanos, unit)
}

pub fn is_memory_unit(unit: &str) -> bool {
    MEMORY_UNITS.iter().any(|(label, _)| *label == unit)
}

pub fn is_time_unit(unit: &str) -> bool {
    TIME_UNITS.iter().any(|(label, _)| *label == unit)
}
