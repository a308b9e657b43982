//! Field-by-field views of a lot (initial data against the staff override)
//! and the override form.

use catalog_api::{LotData, LotDto};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

const TABLE_FIELDS: [&str; 10] = [
    "description",
    "notes",
    "qty",
    "l",
    "w",
    "h",
    "wgt",
    "cpack",
    "force_crate",
    "do_not_tip",
];

const DETAIL_FIELDS: [(&str, &str, bool); 13] = [
    ("Quantity", "qty", false),
    ("Length", "l", false),
    ("Width", "w", false),
    ("Height", "h", false),
    ("Weight", "wgt", false),
    ("Value", "value", false),
    ("Case/Pack", "cpack", false),
    ("Description", "description", false),
    ("Notes", "notes", false),
    ("Conditions", "noted_conditions", false),
    ("Commodity ID", "commodity_id", false),
    ("Force Crate", "force_crate", true),
    ("Do Not Tip", "do_not_tip", true),
];

fn field_value(data: &LotData, attr: &str) -> Option<String> {
    match attr {
        "qty" => data.qty.map(|v| v.to_string()),
        "l" => data.l.map(|v| v.to_string()),
        "w" => data.w.map(|v| v.to_string()),
        "h" => data.h.map(|v| v.to_string()),
        "wgt" => data.wgt.map(|v| v.to_string()),
        "value" => data.value.map(|v| v.to_string()),
        "cpack" => data.cpack.clone(),
        "description" => data.description.clone(),
        "notes" => data.notes.clone(),
        "noted_conditions" => data.noted_conditions.clone(),
        "commodity_id" => data.commodity_id.map(|v| v.to_string()),
        "force_crate" => data.force_crate.map(|v| v.to_string()),
        "do_not_tip" => data.do_not_tip.map(|v| v.to_string()),
        _ => None,
    }
}

/// One comparison cell. `changed` only when an override exists and holds a
/// different value than the initial data.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCell {
    pub value: String,
    pub original: String,
    pub changed: bool,
}

impl FieldCell {
    fn new(lot: &LotDto, attr: &str) -> Self {
        let initial = lot.initial_data.as_ref().and_then(|d| field_value(d, attr));
        let over = lot.override_data().map(|d| field_value(d, attr));
        let changed = matches!(&over, Some(o) if *o != initial);
        let value = match &over {
            Some(Some(o)) => Some(o.clone()),
            _ => initial.clone(),
        };
        Self {
            value: value.unwrap_or_default(),
            original: initial.unwrap_or_default(),
            changed,
        }
    }

    pub fn is_true(&self) -> bool {
        self.value == "true"
    }
}

#[derive(Debug, Clone)]
pub struct LotRow {
    pub lot_id: i64,
    pub customer_item_id: String,
    pub lot_number: String,
    pub image: Option<String>,
    pub fields: HashMap<&'static str, FieldCell>,
    pub highlighted: bool,
}

impl LotRow {
    pub fn new(lot: &LotDto) -> Self {
        Self {
            lot_id: lot.id,
            customer_item_id: lot.customer_item_id.clone().unwrap_or_default(),
            lot_number: lot.lot_number().to_string(),
            image: lot.image_urls().into_iter().next(),
            fields: TABLE_FIELDS
                .iter()
                .map(|attr| (*attr, FieldCell::new(lot, attr)))
                .collect(),
            highlighted: false,
        }
    }

    /// Cell for `attr`; unknown names render empty.
    pub fn cell(&self, attr: &str) -> FieldCell {
        self.fields.get(attr).cloned().unwrap_or(FieldCell {
            value: String::new(),
            original: String::new(),
            changed: false,
        })
    }
}

pub fn lot_rows(lots: &[LotDto], highlight: Option<&str>) -> Vec<LotRow> {
    lots.iter()
        .map(|lot| {
            let mut row = LotRow::new(lot);
            row.highlighted = highlight.is_some_and(|h| h == row.customer_item_id);
            row
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailRow {
    pub label: &'static str,
    pub attr: &'static str,
    pub initial: String,
    pub override_value: String,
    pub changed: bool,
    pub is_flag: bool,
}

/// All thirteen fields of a lot, plus whether an override exists.
pub fn detail_rows(lot: &LotDto) -> (Vec<DetailRow>, bool) {
    let rows = DETAIL_FIELDS
        .iter()
        .map(|&(label, attr, is_flag)| {
            let initial = lot.initial_data.as_ref().and_then(|d| field_value(d, attr));
            let over = lot.override_data().and_then(|d| field_value(d, attr));
            DetailRow {
                label,
                attr,
                changed: lot.override_data().is_some() && over != initial,
                initial: initial.unwrap_or_default(),
                override_value: over.unwrap_or_default(),
                is_flag,
            }
        })
        .collect();
    (rows, lot.override_data().is_some())
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Raw override form as posted. Everything is optional; checkboxes are
/// present only when ticked.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct OverrideForm {
    pub qty: String,
    pub l: String,
    pub w: String,
    pub h: String,
    pub wgt: String,
    pub value: String,
    pub cpack: String,
    pub noted_conditions: String,
    pub commodity_id: String,
    pub force_crate: Option<String>,
    pub do_not_tip: Option<String>,
}

impl OverrideForm {
    /// Prefills from the override when there is one, else from initial data.
    pub fn for_lot(lot: &LotDto) -> Self {
        let source = lot.override_data().or(lot.initial_data.as_ref());
        let Some(data) = source else {
            return Self::default();
        };
        let text = |attr| field_value(data, attr).unwrap_or_default();
        Self {
            qty: text("qty"),
            l: text("l"),
            w: text("w"),
            h: text("h"),
            wgt: text("wgt"),
            value: text("value"),
            cpack: text("cpack"),
            noted_conditions: text("noted_conditions"),
            commodity_id: text("commodity_id"),
            force_crate: data.force_crate.filter(|f| *f).map(|_| "on".to_string()),
            do_not_tip: data.do_not_tip.filter(|f| *f).map(|_| "on".to_string()),
        }
    }

    pub fn validate(&self) -> Result<LotData, Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut data = LotData {
            qty: int_field("qty", &self.qty, &mut errors),
            l: decimal_field("l", &self.l, 10, &mut errors),
            w: decimal_field("w", &self.w, 10, &mut errors),
            h: decimal_field("h", &self.h, 10, &mut errors),
            wgt: decimal_field("wgt", &self.wgt, 10, &mut errors),
            value: decimal_field("value", &self.value, 12, &mut errors),
            commodity_id: int_field("commodity_id", &self.commodity_id, &mut errors),
            force_crate: Some(self.force_crate.is_some()),
            do_not_tip: Some(self.do_not_tip.is_some()),
            ..Default::default()
        };
        let cpack = self.cpack.trim();
        if cpack.chars().count() > 200 {
            errors.push(FieldError {
                field: "cpack",
                message: "Ensure this value has at most 200 characters.".to_string(),
            });
        } else if !cpack.is_empty() {
            data.cpack = Some(cpack.to_string());
        }
        let conditions = self.noted_conditions.trim();
        if !conditions.is_empty() {
            data.noted_conditions = Some(conditions.to_string());
        }
        if errors.is_empty() {
            Ok(data)
        } else {
            Err(errors)
        }
    }
}

fn int_field(field: &'static str, raw: &str, errors: &mut Vec<FieldError>) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) => {
            errors.push(FieldError {
                field,
                message: "Enter a whole number.".to_string(),
            });
            None
        }
    }
}

/// Up to two decimal places and `max_digits` digits in total.
fn decimal_field(
    field: &'static str,
    raw: &str,
    max_digits: u32,
    errors: &mut Vec<FieldError>,
) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let Ok(value) = Decimal::from_str(raw) else {
        errors.push(FieldError {
            field,
            message: "Enter a number.".to_string(),
        });
        return None;
    };
    let value = value.normalize();
    if value.scale() > 2 {
        errors.push(FieldError {
            field,
            message: "Ensure that there are no more than 2 decimal places.".to_string(),
        });
        return None;
    }
    let digits = value.mantissa().unsigned_abs().to_string().len() as u32;
    let whole_digits = digits.saturating_sub(value.scale());
    let message = if digits > max_digits {
        Some(format!("Ensure that there are no more than {max_digits} digits in total."))
    } else if whole_digits > max_digits - 2 {
        Some(format!(
            "Ensure that there are no more than {} digits before the decimal point.",
            max_digits - 2
        ))
    } else {
        None
    };
    if let Some(message) = message {
        errors.push(FieldError { field, message });
        return None;
    }
    value.to_f64()
}

/// Inline row edits: numbers that do not parse are skipped, empty text is
/// skipped, checkboxes are true when present.
pub fn inline_override(form: &HashMap<String, String>) -> LotData {
    let text = |key: &str| {
        form.get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let number = |key: &str| text(key).and_then(|v| v.parse::<f64>().ok());
    LotData {
        qty: text("qty").and_then(|v| {
            v.parse::<i64>()
                .ok()
                .or_else(|| v.parse::<f64>().ok().map(|f| f.trunc() as i64))
        }),
        l: number("l"),
        w: number("w"),
        h: number("h"),
        wgt: number("wgt"),
        description: text("description"),
        notes: text("notes"),
        cpack: text("cpack"),
        force_crate: Some(form.contains_key("force_crate")),
        do_not_tip: Some(form.contains_key("do_not_tip")),
        ..Default::default()
    }
}
