use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use std::collections::HashMap;
use std::io::Cursor;
use time::macros::{date, format_description};
use time::{Duration, PrimitiveDateTime, Time};

use super::{ImportError, Row};

pub fn read_csv(bytes: &[u8]) -> Result<Vec<Row>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .filter(|(h, _)| !h.is_empty())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// A JSON array of flat objects. Scalars are stringified, `null` is dropped.
pub fn read_json(bytes: &[u8]) -> Result<Vec<Row>, ImportError> {
    let records: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_slice(bytes)?;
    Ok(records
        .into_iter()
        .map(|record| {
            record
                .into_iter()
                .filter_map(|(k, v)| json_cell(v).map(|v| (k.trim().to_string(), v)))
                .collect()
        })
        .collect())
}

fn json_cell(value: serde_json::Value) -> Option<String> {
    use serde_json::Value;
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.as_f64().map(format_float).unwrap_or_else(|| n.to_string()),
        }),
        other => Some(other.to_string()),
    }
}

/// First worksheet, first row as headers.
pub fn read_xlsx(bytes: Vec<u8>) -> Result<Vec<Row>, ImportError> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ImportError::EmptyWorkbook)??;
    let mut rows = range.rows();
    let Some(headers) = rows.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = headers
        .iter()
        .map(|h| cell_text(h).unwrap_or_default().trim().to_string())
        .collect();
    Ok(rows
        .filter(|cells| cells.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|cells| {
            headers
                .iter()
                .zip(cells.iter())
                .filter(|(h, _)| !h.is_empty())
                .filter_map(|(h, c)| cell_text(c).map(|v| (h.clone(), v)))
                .collect::<HashMap<_, _>>()
        })
        .collect())
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(format_float(*f)),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => excel_serial_to_text(dt.as_f64()),
    }
}

/// Whole numbers lose their `.0` so ids read back as written.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

/// Excel stores dates as days since 1899-12-30.
pub(crate) fn excel_serial_to_text(serial: f64) -> Option<String> {
    let epoch = PrimitiveDateTime::new(date!(1899 - 12 - 30), Time::MIDNIGHT);
    let seconds = (serial * 86_400.0).round() as i64;
    let value = epoch.checked_add(Duration::seconds(seconds))?;
    value
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .ok()
}
