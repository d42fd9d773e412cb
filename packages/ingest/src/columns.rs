//! Header auto-mapping.
//!
//! Maps arbitrary CSV header spellings to [`CanonicalField`]s using a
//! static synonym table. Adding a spelling means adding a string to
//! [`SYNONYMS`]; the matching logic never changes.

use std::collections::BTreeSet;

use serde::Serialize;
use smart_mining_sample_models::CanonicalField;

/// Accepted header spellings per canonical field, after normalization
/// (see [`normalize_header`]). A spelling must appear under one field only.
pub const SYNONYMS: &[(CanonicalField, &[&str])] = &[
    (
        CanonicalField::XCoord,
        &["x", "x_coord", "xcoord", "coord_x", "easting", "east"],
    ),
    (
        CanonicalField::YCoord,
        &["y", "y_coord", "ycoord", "coord_y", "northing", "north"],
    ),
    (
        CanonicalField::ZCoord,
        &[
            "z",
            "z_coord",
            "zcoord",
            "coord_z",
            "depth",
            "elevation",
            "elev",
        ],
    ),
    (
        CanonicalField::Teneur,
        &["teneur", "grade", "grade_percent", "value", "assay"],
    ),
    (
        CanonicalField::Id,
        &["id", "identifier", "sample_id", "forage_id"],
    ),
];

/// A resolved source column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedColumn {
    /// Zero-based position in the header row.
    pub index: usize,
    /// Header text as it appeared in the file (trimmed).
    pub header: String,
}

/// Where each canonical field lives in a particular file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    /// Easting column.
    pub x_coord: MappedColumn,
    /// Northing column.
    pub y_coord: MappedColumn,
    /// Depth/elevation column.
    pub z_coord: MappedColumn,
    /// Grade column.
    pub teneur: MappedColumn,
    /// Identifier column, when the file has one.
    pub id: Option<MappedColumn>,
}

impl ColumnMapping {
    /// The column mapped to `field`, if any.
    #[must_use]
    pub const fn column(&self, field: CanonicalField) -> Option<&MappedColumn> {
        match field {
            CanonicalField::XCoord => Some(&self.x_coord),
            CanonicalField::YCoord => Some(&self.y_coord),
            CanonicalField::ZCoord => Some(&self.z_coord),
            CanonicalField::Teneur => Some(&self.teneur),
            CanonicalField::Id => self.id.as_ref(),
        }
    }
}

/// One or more required fields had no matching header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing required columns: {}", join_fields(.missing))]
pub struct UnmappableColumns {
    /// Required fields with no matching header.
    pub missing: BTreeSet<CanonicalField>,
}

fn join_fields(fields: &BTreeSet<CanonicalField>) -> String {
    fields
        .iter()
        .map(CanonicalField::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Normalizes a header cell for synonym lookup: strips a byte-order mark,
/// trims, lowercases, and folds runs of whitespace, `-` and `.` into `_`.
#[must_use]
pub fn normalize_header(raw: &str) -> String {
    let trimmed = raw.trim_start_matches('\u{feff}').trim();
    let mut out = String::with_capacity(trimmed.len());
    let mut pending_sep = false;

    for ch in trimmed.chars() {
        if ch.is_whitespace() || ch == '-' || ch == '.' || ch == '_' {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.extend(ch.to_lowercase());
    }

    out
}

/// Looks up the canonical field for a single header cell.
#[must_use]
pub fn canonical_for(header: &str) -> Option<CanonicalField> {
    let normalized = normalize_header(header);
    SYNONYMS
        .iter()
        .find(|(_, spellings)| spellings.contains(&normalized.as_str()))
        .map(|(field, _)| *field)
}

/// Resolves a header row into a [`ColumnMapping`].
///
/// Headers are scanned left to right; when two headers resolve to the same
/// field, the first one wins and the later one is ignored.
///
/// # Errors
///
/// Returns [`UnmappableColumns`] listing every required field that no
/// header resolved to.
pub fn map_columns<I, S>(headers: I) -> Result<ColumnMapping, UnmappableColumns>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut resolved: [Option<MappedColumn>; 5] = Default::default();

    for (index, header) in headers.into_iter().enumerate() {
        let header = header.as_ref();
        let Some(field) = canonical_for(header) else {
            continue;
        };

        let slot = &mut resolved[slot_of(field)];
        if let Some(existing) = slot {
            log::debug!(
                "Ignoring column {index} ({header:?}): {field} already mapped to column {} ({:?})",
                existing.index,
                existing.header
            );
            continue;
        }

        *slot = Some(MappedColumn {
            index,
            header: header.trim_start_matches('\u{feff}').trim().to_string(),
        });
    }

    let [x_coord, y_coord, z_coord, teneur, id] = resolved;

    match (x_coord, y_coord, z_coord, teneur) {
        (Some(x_coord), Some(y_coord), Some(z_coord), Some(teneur)) => Ok(ColumnMapping {
            x_coord,
            y_coord,
            z_coord,
            teneur,
            id,
        }),
        (x, y, z, t) => {
            let missing = CanonicalField::REQUIRED
                .into_iter()
                .zip([x.is_none(), y.is_none(), z.is_none(), t.is_none()])
                .filter_map(|(field, absent)| absent.then_some(field))
                .collect();
            Err(UnmappableColumns { missing })
        }
    }
}

const fn slot_of(field: CanonicalField) -> usize {
    match field {
        CanonicalField::XCoord => 0,
        CanonicalField::YCoord => 1,
        CanonicalField::ZCoord => 2,
        CanonicalField::Teneur => 3,
        CanonicalField::Id => 4,
    }
}
