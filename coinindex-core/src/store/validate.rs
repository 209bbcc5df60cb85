//! Row validation shared by every snapshot backend.
//!
//! Backends translate their native cells into [`RawValue`]s and hand them to
//! [`parse_row`], so a CSV file and a SQLite table with the same content are
//! accepted or rejected identically. Nothing is coerced: numeric text must
//! parse exactly as written.

use super::StoreError;
use crate::domain::MarketRow;
use chrono::NaiveDate;

/// Snapshot columns in canonical order.
pub const COLUMNS: [&str; 7] = [
    "date",
    "coin_id",
    "symbol",
    "price",
    "volume",
    "market_cap",
    "rank",
];

/// A backend-neutral view of one stored cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue<'a> {
    Null,
    Integer(i64),
    Real(f64),
    Text(&'a str),
    /// Anything else the backend can hold (e.g. a blob).
    Other,
}

impl RawValue<'_> {
    fn kind(&self) -> &'static str {
        match self {
            RawValue::Null => "null",
            RawValue::Integer(_) => "integer",
            RawValue::Real(_) => "real",
            RawValue::Text(_) => "text",
            RawValue::Other => "binary",
        }
    }
}

/// Validate one data row. `row` is the 1-based data row number used in errors.
pub fn parse_row(
    date: NaiveDate,
    row: usize,
    values: &[RawValue<'_>; 7],
) -> Result<MarketRow, StoreError> {
    let bad = |field: &str, reason: String| StoreError::malformed(date, row, field, reason);

    if is_header_artifact(values) {
        return Err(bad("coin_id", "header row repeated as data".into()));
    }

    let row_date = text(values[0]).ok_or_else(|| bad("date", expected("text", values[0])))?;
    let parsed = NaiveDate::parse_from_str(row_date, "%Y-%m-%d")
        .map_err(|e| bad("date", format!("'{row_date}' is not a date: {e}")))?;
    if parsed != date {
        return Err(bad("date", format!("row is dated {parsed}")));
    }

    let coin_id = text(values[1]).ok_or_else(|| bad("coin_id", expected("text", values[1])))?;
    if coin_id.is_empty() {
        return Err(bad("coin_id", "empty".into()));
    }
    let symbol = text(values[2]).ok_or_else(|| bad("symbol", expected("text", values[2])))?;

    let price = non_negative(values[3]).map_err(|r| bad("price", r))?;
    let volume = non_negative(values[4]).map_err(|r| bad("volume", r))?;
    let market_cap = non_negative(values[5]).map_err(|r| bad("market_cap", r))?;
    let rank = rank(values[6]).map_err(|r| bad("rank", r))?;

    Ok(MarketRow {
        coin_id: coin_id.to_string(),
        symbol: symbol.to_string(),
        price,
        volume,
        market_cap,
        rank,
    })
}

/// A row whose cells mostly spell out the column names.
fn is_header_artifact(values: &[RawValue<'_>; 7]) -> bool {
    values
        .iter()
        .zip(COLUMNS)
        .filter(|(v, name)| **v == RawValue::Text(name))
        .count()
        >= 3
}

fn text(v: RawValue<'_>) -> Option<&str> {
    match v {
        RawValue::Text(s) => Some(s),
        _ => None,
    }
}

fn expected(what: &str, got: RawValue<'_>) -> String {
    format!("expected {what}, found {}", got.kind())
}

fn non_negative(v: RawValue<'_>) -> Result<f64, String> {
    let x = match v {
        RawValue::Real(x) => x,
        RawValue::Integer(i) => i as f64,
        RawValue::Text(s) => s
            .parse::<f64>()
            .map_err(|_| format!("'{s}' is not a number"))?,
        other => return Err(expected("number", other)),
    };
    if !x.is_finite() {
        return Err(format!("{x} is not finite"));
    }
    if x < 0.0 {
        return Err(format!("{x} is negative"));
    }
    Ok(x)
}

fn rank(v: RawValue<'_>) -> Result<u32, String> {
    match v {
        RawValue::Integer(i) => u32::try_from(i).map_err(|_| format!("{i} is out of range")),
        RawValue::Text(s) => s
            .parse::<u32>()
            .map_err(|_| format!("'{s}' is not a whole number")),
        other => Err(expected("integer", other)),
    }
}
