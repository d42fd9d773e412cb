//! Row coercion: raw string cells to a validated [`SampleRecord`].

use std::borrow::Cow;

use csv::StringRecord;
use smart_mining_ingest_models::{DropReason, IngestOptions};
use smart_mining_sample_models::{CanonicalField, SampleRecord};

use crate::columns::ColumnMapping;

/// Converts one data row into a [`SampleRecord`].
///
/// Required fields are checked in canonical order and the first failure
/// becomes the row's [`DropReason`]. The id is best-effort: an unmapped,
/// blank, or unparseable id yields `None` without dropping the row.
///
/// # Errors
///
/// Returns the [`DropReason`] for a row that cannot become a sample.
pub fn coerce_row(
    record: &StringRecord,
    mapping: &ColumnMapping,
    options: &IngestOptions,
) -> Result<SampleRecord, DropReason> {
    let mut values = [0.0_f64; 4];

    for (slot, field) in values.iter_mut().zip(CanonicalField::REQUIRED) {
        let cell = mapping
            .column(field)
            .and_then(|column| record.get(column.index))
            .unwrap_or("");
        *slot = parse_number(cell, options.decimal_separator).map_err(|kind| kind.reason(field))?;
    }

    let id = mapping
        .id
        .as_ref()
        .and_then(|column| record.get(column.index))
        .and_then(|cell| cell.trim().parse::<i64>().ok());

    let [x, y, z, teneur] = values;
    SampleRecord::new(id, x, y, z, teneur).map_err(|e| DropReason::NonNumeric(e.field))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellError {
    Blank,
    NotANumber,
}

impl CellError {
    const fn reason(self, field: CanonicalField) -> DropReason {
        match self {
            Self::Blank => DropReason::Missing(field),
            Self::NotANumber => DropReason::NonNumeric(field),
        }
    }
}

fn parse_number(cell: &str, decimal_separator: char) -> Result<f64, CellError> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Err(CellError::Blank);
    }

    let normalized = if decimal_separator == '.' {
        Cow::Borrowed(cell)
    } else {
        Cow::Owned(cell.replace(decimal_separator, "."))
    };

    normalized
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or(CellError::NotANumber)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::map_columns;

    fn mapping() -> ColumnMapping {
        map_columns(["id", "x", "y", "z", "teneur"]).unwrap()
    }

    fn row(cells: &[&str]) -> StringRecord {
        StringRecord::from(cells.to_vec())
    }

    #[test]
    fn coerces_a_clean_row() {
        let record = coerce_row(
            &row(&["7", "-6.55", "33.42", "150", "1.25"]),
            &mapping(),
            &IngestOptions::default(),
        )
        .unwrap();
        assert_eq!(record.id(), Some(7));
        assert!((record.x_coord() + 6.55).abs() < f64::EPSILON);
        assert!((record.teneur() - 1.25).abs() < f64::EPSILON);
    }

    #[test]
    fn trims_cells_and_accepts_signs_and_exponents() {
        let record = coerce_row(
            &row(&["", " +1e2 ", "-2.5", " 3 ", "4E-1"]),
            &mapping(),
            &IngestOptions::default(),
        )
        .unwrap();
        assert_eq!(record.id(), None);
        assert!((record.x_coord() - 100.0).abs() < f64::EPSILON);
        assert!((record.teneur() - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn blank_required_cell_is_missing() {
        let err = coerce_row(
            &row(&["1", "1", "  ", "3", "4"]),
            &mapping(),
            &IngestOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, DropReason::Missing(CanonicalField::YCoord));
    }

    #[test]
    fn unparseable_cell_is_non_numeric() {
        let err = coerce_row(
            &row(&["1", "1", "2", "abc", "4"]),
            &mapping(),
            &IngestOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, DropReason::NonNumeric(CanonicalField::ZCoord));
    }

    #[test]
    fn non_finite_values_are_non_numeric() {
        for bad in ["NaN", "inf", "-Infinity"] {
            let err = coerce_row(
                &row(&["1", "1", "2", "3", bad]),
                &mapping(),
                &IngestOptions::default(),
            )
            .unwrap_err();
            assert_eq!(err, DropReason::NonNumeric(CanonicalField::Teneur), "{bad}");
        }
    }

    #[test]
    fn first_failing_field_in_canonical_order_wins() {
        let err = coerce_row(
            &row(&["1", "", "2", "x", "4"]),
            &mapping(),
            &IngestOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, DropReason::Missing(CanonicalField::XCoord));
    }

    #[test]
    fn honors_decimal_comma() {
        let options = IngestOptions {
            decimal_separator: ',',
        };
        let record = coerce_row(&row(&["", "1,5", "2", "3", "0,75"]), &mapping(), &options).unwrap();
        assert!((record.x_coord() - 1.5).abs() < f64::EPSILON);
        assert!((record.teneur() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn unparseable_id_becomes_none() {
        let record = coerce_row(
            &row(&["DH-01", "1", "2", "3", "4"]),
            &mapping(),
            &IngestOptions::default(),
        )
        .unwrap();
        assert_eq!(record.id(), None);
    }
}
