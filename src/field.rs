use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::Rect;

/// Prefix every image-valued field must carry.
pub const IMAGE_DATA_MARKER: &str = "data:image";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Signature,
    Initial,
    Date,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Signature => write!(f, "signature"),
            FieldType::Initial => write!(f, "initial"),
            FieldType::Date => write!(f, "date"),
        }
    }
}

impl FieldType {
    /// Default box size in native points.
    pub fn default_size(&self) -> (f64, f64) {
        match self {
            FieldType::Signature => (180.0, 50.0),
            FieldType::Initial => (120.0, 40.0),
            FieldType::Date => (150.0, 35.0),
        }
    }

    /// Signature and initial fields carry images; date fields carry text.
    pub fn is_image(&self) -> bool {
        !matches!(self, FieldType::Date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureField {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// 1-based page number.
    pub page: usize,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub is_filled: bool,
}

impl SignatureField {
    /// New field with the type's default size. Date fields come pre-filled
    /// with `today`.
    pub fn new(id: String, field_type: FieldType, page: usize, x: f64, y: f64, today: NaiveDate) -> Self {
        let (width, height) = field_type.default_size();
        let mut field = Self {
            id,
            field_type,
            page,
            x,
            y,
            width,
            height,
            value: None,
            is_filled: false,
        };
        if field_type == FieldType::Date {
            field.fill_date(today);
        }
        field
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn fill_date(&mut self, today: NaiveDate) {
        self.value = Some(format_date(today));
        self.is_filled = true;
    }

    pub fn clear(&mut self) {
        self.value = None;
        self.is_filled = false;
    }

    /// The value, but only when the field is actually filled.
    pub fn filled_value(&self) -> Option<&str> {
        if self.is_filled {
            self.value.as_deref()
        } else {
            None
        }
    }

    /// Whether the fill state satisfies the field invariant: filled implies a
    /// value, and image fields hold image data.
    pub fn is_consistent(&self) -> bool {
        if !self.is_filled {
            return true;
        }
        match &self.value {
            None => false,
            Some(v) if self.field_type.is_image() => is_image_data(v),
            Some(_) => true,
        }
    }
}

pub fn is_image_data(value: &str) -> bool {
    value.starts_with(IMAGE_DATA_MARKER)
}

/// `MM/DD/YYYY`.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%m/%d/%Y").to_string()
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}
