//! Separator detection on the header line.

use smart_mining_ingest_models::Delimiter;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Strips a leading UTF-8 byte-order mark.
#[must_use]
pub fn strip_bom(content: &[u8]) -> &[u8] {
    content.strip_prefix(UTF8_BOM).unwrap_or(content)
}

/// The first line of `content`, without BOM or line terminator.
fn header_line(content: &[u8]) -> &[u8] {
    let content = strip_bom(content);
    let line = content
        .iter()
        .position(|&b| b == b'\n')
        .map_or(content, |end| &content[..end]);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Number of fields the header splits into with `delimiter`, honoring
/// quotes so a quoted separator does not count.
fn field_count(line: &[u8], delimiter: Delimiter) -> usize {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter.as_byte())
        .from_reader(line);

    let mut record = csv::ByteRecord::new();
    match reader.read_byte_record(&mut record) {
        Ok(true) => record.len(),
        Ok(false) | Err(_) => 0,
    }
}

/// Picks the candidate that splits the header line into the most fields.
///
/// Ties go to the earlier entry of [`Delimiter::CANDIDATES`].
///
/// # Errors
///
/// Returns a human-readable reason when the file is empty or no candidate
/// yields more than one column.
pub fn detect_delimiter(content: &[u8]) -> Result<Delimiter, String> {
    let line = header_line(content);
    if line.iter().all(u8::is_ascii_whitespace) {
        return Err("file has no header line".to_string());
    }

    let mut best = (Delimiter::Comma, 0usize);
    for candidate in Delimiter::CANDIDATES {
        let count = field_count(line, candidate);
        log::trace!("Header splits into {count} fields on {candidate:?}");
        if count > best.1 {
            best = (candidate, count);
        }
    }

    if best.1 <= 1 {
        return Err("header line does not split on comma, semicolon, or tab".to_string());
    }

    Ok(best.0)
}
