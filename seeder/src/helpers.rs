use std::ops::RangeInclusive;

use snafu::{ResultExt, Snafu, ensure};

#[derive(Debug, Clone, Snafu)]
pub enum RangeParserError {
    #[snafu(display("Empty range string"))]
    Empty,
    #[snafu(display("Range start {start} is after its end {end}"))]
    Reversed { start: u64, end: u64 },
    #[snafu(display("Failed to parse {value:?} as a number"))]
    Parse {
        value: String,
        source: std::num::ParseIntError,
    },
}

/// Parses either a single number (`10001`) or an inclusive range
/// (`10001-10020`).
pub fn parse_range(range_str: &str) -> Result<RangeInclusive<u64>, RangeParserError> {
    let range_str = range_str.trim();
    ensure!(!range_str.is_empty(), EmptySnafu);

    let Some((start, end)) = range_str.split_once('-') else {
        let value = parse_number(range_str)?;
        return Ok(value..=value);
    };

    let start = parse_number(start)?;
    let end = parse_number(end)?;
    ensure!(start <= end, ReversedSnafu { start, end });

    Ok(start..=end)
}

fn parse_number(value: &str) -> Result<u64, RangeParserError> {
    let value = value.trim();
    value.parse::<u64>().context(ParseSnafu { value })
}
