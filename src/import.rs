use catalog_api::{
    BulkInsertCatalogRequest, BulkInsertLotRequest, BulkInsertRequest, BulkInsertSellerRequest,
    LotData,
};
use derive_more::{Display, Error};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime};

pub mod controllers;
mod table;

pub const DEFAULT_AGENT: &str = "DLC";
pub const SUPPORTED_EXTENSIONS: [&str; 3] = [".csv", ".json", ".xlsx"];
pub const DEFAULT_CPACK: &str = "3";

const IMAGE_URL_TEMPLATE: &str = "https://s3.amazonaws.com/static2.liveauctioneers.com";

/// One spreadsheet row keyed by its (trimmed) header.
pub type Row = HashMap<String, String>;

#[derive(Debug, Display, Error)]
pub enum ImportError {
    #[display("Unsupported file type '{_0}'. Supported types: .csv, .json, .xlsx")]
    #[error(ignore)]
    UnsupportedExtension(String),
    #[display("Unable to read file: {_0}")]
    Io(std::io::Error),
    #[display("Invalid CSV: {_0}")]
    Csv(csv::Error),
    #[display("Invalid JSON: {_0}")]
    Json(serde_json::Error),
    #[display("Invalid spreadsheet: {_0}")]
    Xlsx(calamine::XlsxError),
    #[display("Workbook has no sheets")]
    EmptyWorkbook,
    #[display("Row {row}: missing value for '{column}'")]
    MissingColumn { row: usize, column: &'static str },
    #[display("Row {row}: invalid {column} '{value}'")]
    BadValue {
        row: usize,
        column: &'static str,
        value: String,
    },
}

impl From<std::io::Error> for ImportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<csv::Error> for ImportError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<calamine::XlsxError> for ImportError {
    fn from(value: calamine::XlsxError) -> Self {
        Self::Xlsx(value)
    }
}

/// Lowercased extension (with the dot) when it is one we can read.
pub fn supported_extension(name: &str) -> Result<&'static str, ImportError> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();
    SUPPORTED_EXTENSIONS
        .iter()
        .find(|s| **s == ext)
        .copied()
        .ok_or(ImportError::UnsupportedExtension(ext))
}

pub fn read_rows(name: &str, bytes: Vec<u8>) -> Result<Vec<Row>, ImportError> {
    match supported_extension(name)? {
        ".csv" => table::read_csv(&bytes),
        ".json" => table::read_json(&bytes),
        _ => table::read_xlsx(bytes),
    }
}

/// Parses an in-memory file into a bulk insert request and a human summary.
pub fn load_bytes(
    name: &str,
    bytes: Vec<u8>,
    agent: &str,
) -> Result<(BulkInsertRequest, String), ImportError> {
    let rows = read_rows(name, bytes)?;
    let request = build_request(&rows, agent, OffsetDateTime::now_utc())?;
    let summary = summarize(name, rows.len(), &request);
    Ok((request, summary))
}

pub fn load_file(path: &Path, agent: &str) -> Result<(BulkInsertRequest, String), ImportError> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    load_bytes(&name, bytes, agent)
}

/// Importable files of `dir`, sorted. A missing directory is just empty.
pub fn list_import_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| supported_extension(n).is_ok())
        })
        .collect();
    files.sort();
    files
}

pub fn summarize(name: &str, rows: usize, request: &BulkInsertRequest) -> String {
    let mut out = format!(
        "File: {name} ({rows} rows)\nCatalogs: {}",
        request.catalogs.len()
    );
    for catalog in &request.catalogs {
        let title: String = catalog.title.chars().take(40).collect();
        out.push_str(&format!(
            "\n  {}: {title}\n    Sellers: {}, Lots: {}",
            catalog.customer_catalog_id,
            catalog.sellers.len(),
            catalog.lots.len()
        ));
    }
    out
}

/// Groups rows by catalog id. Catalog fields come from the first row of each
/// catalog, sellers are collected once per house.
pub fn build_request(
    rows: &[Row],
    default_agent: &str,
    now: OffsetDateTime,
) -> Result<BulkInsertRequest, ImportError> {
    let mut catalogs: Vec<BulkInsertCatalogRequest> = Vec::new();
    let mut by_id: HashMap<i64, usize> = HashMap::new();
    let mut houses: Vec<HashSet<i64>> = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let row_no = i + 2;
        let catalog_id = required_int(row, row_no, "Catalog ID")?;
        let house_id = required_int(row, row_no, "House ID")?;
        let lot_id = required_int(row, row_no, "Lot ID")?;

        let idx = match by_id.get(&catalog_id) {
            Some(idx) => *idx,
            None => {
                let raw = cell(row, "Catalog Start Date").ok_or(ImportError::MissingColumn {
                    row: row_no,
                    column: "Catalog Start Date",
                })?;
                let start = parse_date(raw).ok_or_else(|| ImportError::BadValue {
                    row: row_no,
                    column: "Catalog Start Date",
                    value: raw.to_string(),
                })?;
                let start = ensure_future(start, now);
                catalogs.push(BulkInsertCatalogRequest {
                    customer_catalog_id: catalog_id.to_string(),
                    title: cell(row, "Catalog Title").unwrap_or_default().to_string(),
                    start_date: start,
                    end_date: start + Duration::hours(1),
                    agent: cell(row, "Agent").unwrap_or(default_agent).to_string(),
                    sellers: Vec::new(),
                    lots: Vec::new(),
                });
                houses.push(HashSet::new());
                by_id.insert(catalog_id, catalogs.len() - 1);
                catalogs.len() - 1
            }
        };

        let catalog = &mut catalogs[idx];
        if houses[idx].insert(house_id) {
            catalog.sellers.push(BulkInsertSellerRequest {
                customer_display_id: house_id,
                name: cell(row, "House Name").map(str::to_string),
                is_active: true,
            });
        }
        catalog
            .lots
            .push(build_lot(row, house_id, catalog_id, lot_id));
    }

    Ok(BulkInsertRequest { catalogs })
}

fn build_lot(row: &Row, house_id: i64, catalog_id: i64, lot_id: i64) -> BulkInsertLotRequest {
    let lot_number = cell(row, "Lot Num").unwrap_or_default().to_string();
    let title = cell(row, "Lot Title").unwrap_or_default();
    let description = format!("{lot_number} {title}").trim().to_string();

    let to_inches = dimension_factor(cell(row, "Shipping Dimension Type").unwrap_or("in"));
    let to_pounds = weight_factor(cell(row, "Shipping Weight Type").unwrap_or("lb"));
    let dim = |column| to_float(cell(row, column)) * to_inches;

    let data = LotData {
        qty: Some(to_int(cell(row, "Shipping Quantity"), 1)),
        l: Some(dim("Shipping Depth")),
        w: Some(dim("Shipping Width")),
        h: Some(dim("Shipping Height")),
        wgt: Some(to_float(cell(row, "Shipping Weight")) * to_pounds),
        cpack: Some(cpack(cell(row, "Fragility").unwrap_or("f")).to_string()),
        description: Some(description),
        notes: cell(row, "Lot Description").map(str::to_string),
        force_crate: Some(
            cell(row, "Crate").is_some_and(|c| c.eq_ignore_ascii_case("ct")),
        ),
        ..Default::default()
    };

    BulkInsertLotRequest {
        customer_item_id: lot_id.to_string(),
        lot_number,
        initial_data: data.clone(),
        overriden_data: vec![data],
        image_links: vec![image_url(house_id, catalog_id, lot_id)],
    }
}

pub fn image_url(house_id: i64, catalog_id: i64, lot_id: i64) -> String {
    format!("{IMAGE_URL_TEMPLATE}/{house_id}/{catalog_id}/{lot_id}_1_m.jpg")
}

/// Fragility code to case/pack code.
pub fn cpack(fragility: &str) -> &'static str {
    match fragility.trim().to_lowercase().as_str() {
        "nf" => "1",
        "lf" => "2",
        "f" => "3",
        "vf" => "4",
        "pbo" => "pbo",
        _ => DEFAULT_CPACK,
    }
}

pub fn dimension_factor(unit: &str) -> f64 {
    match unit.trim().to_lowercase().as_str() {
        "cm" => 1.0 / 2.54,
        "mm" => 1.0 / 25.4,
        _ => 1.0,
    }
}

pub fn weight_factor(unit: &str) -> f64 {
    match unit.trim().to_lowercase().as_str() {
        "kg" => 2.20462,
        "oz" => 1.0 / 16.0,
        _ => 1.0,
    }
}

fn cell<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).map(|v| v.trim()).filter(|v| !v.is_empty())
}

pub fn to_float(value: Option<&str>) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Integers may arrive as `"3.0"`; the fraction is truncated.
pub fn to_int(value: Option<&str>, default: i64) -> i64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64)
        .unwrap_or(default)
}

fn required_int(row: &Row, row_no: usize, column: &'static str) -> Result<i64, ImportError> {
    let raw = cell(row, column).ok_or(ImportError::MissingColumn {
        row: row_no,
        column,
    })?;
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64)
        .ok_or_else(|| ImportError::BadValue {
            row: row_no,
            column,
            value: raw.to_string(),
        })
}

const DATE_TIME_FORMATS: [&[FormatItem<'static>]; 4] = [
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[month padding:none]/[day padding:none]/[year] [hour padding:none]:[minute]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]"),
];

const DATE_FORMATS: [&[FormatItem<'static>]; 2] = [
    format_description!("[year]-[month]-[day]"),
    format_description!("[month padding:none]/[day padding:none]/[year]"),
];

/// Start dates are naive and read as UTC.
pub fn parse_date(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    DATE_TIME_FORMATS
        .iter()
        .find_map(|f| PrimitiveDateTime::parse(value, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| Date::parse(value, f).ok())
                .map(|d| d.midnight())
        })
        .map(PrimitiveDateTime::assume_utc)
}

/// The catalog API rejects past events; those are pushed to 2099.
pub fn ensure_future(value: OffsetDateTime, now: OffsetDateTime) -> OffsetDateTime {
    if value > now {
        return value;
    }
    let day = match (value.month(), value.day()) {
        (time::Month::February, 29) => 28,
        (_, day) => day,
    };
    match Date::from_calendar_date(2099, value.month(), day) {
        Ok(date) => date.with_time(value.time()).assume_utc(),
        Err(_) => value,
    }
}
