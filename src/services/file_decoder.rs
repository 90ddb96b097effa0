//! Spreadsheet decoding
//!
//! Opens an uploaded `.xlsx` / `.xls` payload with `calamine` and yields
//! the data rows of the first sheet as `RawRow`s. Sheet row 0 is the header
//! and is never yielded; rows with no content at all are passed over.
//! A formula cell yields its formula text (without the leading `=`), never
//! its cached result.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use thiserror::Error;
use tracing::debug;

use super::row_parser::{CellValue, RawRow};

/// Number of logical columns read from each row
const COLUMN_COUNT: u32 = 3;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unable to read spreadsheet: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("Spreadsheet contains no sheets")]
    NoSheet,
}

/// Lazy, single-pass iterator over the data rows of the first sheet
pub struct SheetRows {
    values: Range<Data>,
    formulas: Option<Range<String>>,
    next_row: u32,
    end_row: u32,
}

/// Open the first sheet of a spreadsheet payload
pub fn open_first_sheet(payload: Vec<u8>) -> Result<SheetRows, DecodeError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(payload))?;

    let values = workbook
        .worksheet_range_at(0)
        .ok_or(DecodeError::NoSheet)??;

    let formulas = match workbook.sheet_names().first() {
        Some(name) => match workbook.worksheet_formula(name) {
            Ok(range) => Some(range),
            Err(e) => {
                debug!("Formula data unavailable for sheet '{}': {}", name, e);
                None
            }
        },
        None => None,
    };

    // Row 0 is the header regardless of where the used range starts
    let (next_row, end_row) = match (values.start(), values.end()) {
        (Some((start, _)), Some((end, _))) => (start.max(1), end + 1),
        _ => (0, 0),
    };

    Ok(SheetRows {
        values,
        formulas,
        next_row,
        end_row,
    })
}

impl SheetRows {
    fn cell(&self, row: u32, col: u32) -> Option<CellValue> {
        if let Some(formula) = self.formula(row, col) {
            return Some(formula);
        }
        match self.values.get_value((row, col)) {
            Some(Data::Empty) | None => None,
            Some(data) => Some(to_cell_value(data)),
        }
    }

    fn formula(&self, row: u32, col: u32) -> Option<CellValue> {
        self.formulas
            .as_ref()
            .and_then(|f| f.get_value((row, col)))
            .filter(|text| !text.is_empty())
            .map(|text| CellValue::Formula(text.clone()))
    }

    fn row_is_blank(&self, row: u32) -> bool {
        let Some((_, start_col)) = self.values.start() else {
            return true;
        };
        let Some((_, end_col)) = self.values.end() else {
            return true;
        };
        (start_col..=end_col).all(|col| {
            matches!(self.values.get_value((row, col)), Some(Data::Empty) | None)
                && self.formula(row, col).is_none()
        })
    }
}

impl Iterator for SheetRows {
    type Item = RawRow;

    fn next(&mut self) -> Option<RawRow> {
        while self.next_row < self.end_row {
            let row = self.next_row;
            self.next_row += 1;

            if self.row_is_blank(row) {
                continue;
            }

            let cells = (0..COLUMN_COUNT).map(|col| self.cell(row, col)).collect();
            return Some(RawRow {
                row_number: row as usize + 1,
                cells,
            });
        }
        None
    }
}

fn to_cell_value(data: &Data) -> CellValue {
    match data {
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) => CellValue::Date(value),
            None => CellValue::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .or_else(|| {
                chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .map(CellValue::Date)
            .unwrap_or_else(|| CellValue::Text(s.clone())),
        Data::DurationIso(_) | Data::Error(_) | Data::Empty => CellValue::Other,
    }
}
