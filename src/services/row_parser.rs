//! Spreadsheet row parsing
//!
//! Turns one decoded row into a `CandidateRecord`, or explains why the row
//! cannot be imported. The parser never fails: every row ends up as
//! `Parsed`, `Skipped` or `Rejected`.

use chrono::{NaiveDate, NaiveDateTime};

use crate::types::CandidateRecord;

/// Accepted date-of-birth layouts, tried in order
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"];

const NAME_COLUMN: usize = 0;
const DATE_OF_BIRTH_COLUMN: usize = 1;
const NIC_COLUMN: usize = 2;

/// Typed value of one spreadsheet cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    /// Numeric cell carrying a date format
    Date(NaiveDateTime),
    Bool(bool),
    /// Formula without a cached result
    Formula(String),
    /// Error cells and anything else without a text form
    Other,
}

/// One data row as produced by the file decoder
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based row number as shown by spreadsheet applications
    pub row_number: usize,
    /// Logical columns 0..=2; `None` for empty cells
    pub cells: Vec<Option<CellValue>>,
}

impl RawRow {
    fn cell(&self, column: usize) -> Option<&CellValue> {
        self.cells.get(column).and_then(|c| c.as_ref())
    }
}

/// Result of parsing a single row
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Parsed(CandidateRecord),
    /// A mandatory field is missing or blank
    Skipped(String),
    /// The row is complete but its content is invalid
    Rejected(String),
}

/// Text form of a cell, or `None` when the cell has no usable value
pub fn cell_text(cell: Option<&CellValue>) -> Option<String> {
    match cell? {
        CellValue::Text(s) => Some(s.clone()),
        CellValue::Number(n) => Some((n.trunc() as i64).to_string()),
        CellValue::Date(dt) => Some(dt.date().format("%Y-%m-%d").to_string()),
        CellValue::Bool(b) => Some(b.to_string()),
        CellValue::Formula(f) => Some(f.clone()),
        CellValue::Other => None,
    }
}

/// Parse a date of birth using the first matching accepted layout
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse one spreadsheet row: name, date of birth, NIC number
pub fn parse_row(row: &RawRow) -> RowOutcome {
    let name = non_blank(cell_text(row.cell(NAME_COLUMN)));
    let date_of_birth = non_blank(cell_text(row.cell(DATE_OF_BIRTH_COLUMN)));
    let nic_number = non_blank(cell_text(row.cell(NIC_COLUMN)));

    let (name, date_of_birth, nic_number) = match (name, date_of_birth, nic_number) {
        (Some(name), Some(dob), Some(nic)) => (name, dob, nic),
        (name, dob, nic) => {
            let missing: Vec<&str> = [
                (name.is_none(), "name"),
                (dob.is_none(), "date of birth"),
                (nic.is_none(), "NIC number"),
            ]
            .iter()
            .filter(|(absent, _)| *absent)
            .map(|(_, field)| *field)
            .collect();
            return RowOutcome::Skipped(format!("missing {}", missing.join(", ")));
        }
    };

    match parse_date(&date_of_birth) {
        Some(date_of_birth) => RowOutcome::Parsed(CandidateRecord {
            name,
            date_of_birth,
            nic_number,
        }),
        None => RowOutcome::Rejected(format!("Invalid date format: {}", date_of_birth)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Option<CellValue> {
        Some(CellValue::Text(s.to_string()))
    }

    fn row(cells: Vec<Option<CellValue>>) -> RawRow {
        RawRow { row_number: 2, cells }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_date_accepts_each_layout() {
        assert_eq!(parse_date("1990-03-15"), Some(ymd(1990, 3, 15)));
        assert_eq!(parse_date("15/03/1990"), Some(ymd(1990, 3, 15)));
        assert_eq!(parse_date("03/15/1990"), Some(ymd(1990, 3, 15)));
        assert_eq!(parse_date("15-03-1990"), Some(ymd(1990, 3, 15)));
    }

    #[test]
    fn test_parse_date_prefers_day_first_when_ambiguous() {
        assert_eq!(parse_date("01/02/1990"), Some(ymd(1990, 2, 1)));
    }

    #[test]
    fn test_parse_date_rejects_garbage_and_impossible_days() {
        assert_eq!(parse_date("not-a-date"), None);
        assert_eq!(parse_date("1990/03/15"), None);
        // No clamping to the last day of the month
        assert_eq!(parse_date("31/02/1990"), None);
    }

    #[test]
    fn test_parse_date_accepts_single_digit_day_and_month() {
        assert_eq!(parse_date("5/3/1990"), Some(ymd(1990, 3, 5)));
        assert_eq!(parse_date("1990-3-5"), Some(ymd(1990, 3, 5)));
    }

    #[test]
    fn test_cell_text_per_kind() {
        assert_eq!(cell_text(Some(&CellValue::Number(200012345678.0))), Some("200012345678".to_string()));
        assert_eq!(cell_text(Some(&CellValue::Number(42.9))), Some("42".to_string()));
        assert_eq!(cell_text(Some(&CellValue::Bool(true))), Some("true".to_string()));
        assert_eq!(cell_text(Some(&CellValue::Formula("CONCAT(A1,B1)".to_string()))), Some("CONCAT(A1,B1)".to_string()));
        assert_eq!(cell_text(Some(&CellValue::Other)), None);
        assert_eq!(cell_text(None), None);

        let date = ymd(1990, 3, 15).and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(cell_text(Some(&CellValue::Date(date))), Some("1990-03-15".to_string()));
    }

    #[test]
    fn test_parse_row_trims_values() {
        let outcome = parse_row(&row(vec![text("  Nimal Perera "), text(" 15/03/1990"), text("900751234V  ")]));
        assert_eq!(
            outcome,
            RowOutcome::Parsed(CandidateRecord {
                name: "Nimal Perera".to_string(),
                date_of_birth: ymd(1990, 3, 15),
                nic_number: "900751234V".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_row_with_numeric_nic_and_date_cell() {
        let date = ymd(1985, 12, 1).and_hms_opt(0, 0, 0).unwrap();
        let outcome = parse_row(&row(vec![
            text("Kamala"),
            Some(CellValue::Date(date)),
            Some(CellValue::Number(198533512345.0)),
        ]));
        match outcome {
            RowOutcome::Parsed(record) => {
                assert_eq!(record.date_of_birth, ymd(1985, 12, 1));
                assert_eq!(record.nic_number, "198533512345");
            }
            other => panic!("expected parsed row, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_row_skips_missing_identifier() {
        let outcome = parse_row(&row(vec![text("Nimal"), text("1990-03-15")]));
        assert_eq!(outcome, RowOutcome::Skipped("missing NIC number".to_string()));
    }

    #[test]
    fn test_parse_row_skips_blank_name() {
        let outcome = parse_row(&row(vec![text("   "), text("1990-03-15"), text("900751234V")]));
        assert!(matches!(outcome, RowOutcome::Skipped(_)));
    }

    #[test]
    fn test_parse_row_rejects_unparseable_date() {
        let outcome = parse_row(&row(vec![text("Nimal"), text("not-a-date"), text("900751234V")]));
        assert_eq!(outcome, RowOutcome::Rejected("Invalid date format: not-a-date".to_string()));
    }

    #[test]
    fn test_parse_row_treats_other_cells_as_absent() {
        let outcome = parse_row(&row(vec![text("Nimal"), text("1990-03-15"), Some(CellValue::Other)]));
        assert!(matches!(outcome, RowOutcome::Skipped(_)));
    }
}
