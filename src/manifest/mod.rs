//! Update manifest wire format.
//!
//! One record per line, seven `;`-separated fields:
//! `versionCode;versionName;url;sizeBytes;displayName;comment;checksum`.

use log::{debug, warn};

use crate::engine::models::{Manifest, ReleaseRecord};
use crate::error::UpdateError;

const FIELD_COUNT: usize = 7;

/// Parse a manifest document. Malformed lines are logged and skipped.
pub fn parse_manifest(text: &str) -> Manifest {
    debug!("manifest: parsing {} bytes", text.len());
    let mut manifest = Manifest::default();
    // Line numbers count `\r\n` as a single break.
    for (idx, line) in text.split('\n').enumerate() {
        let line_no = idx + 1;
        let line = line.trim_end_matches('\r');
        for segment in line.split('\r').filter(|s| !s.is_empty()) {
            match parse_record(segment, line_no) {
                Ok(record) => manifest.records.push(record),
                Err(err) => {
                    warn!("manifest: skipping line: {err}");
                    manifest.malformed_lines.push(line_no);
                }
            }
        }
    }
    debug!(
        "manifest: {} record(s), {} malformed line(s)",
        manifest.records.len(),
        manifest.malformed_lines.len()
    );
    manifest
}

/// Parse one line. Extra fields past the seventh are ignored.
pub fn parse_record(line: &str, line_no: usize) -> Result<ReleaseRecord, UpdateError> {
    let fields: Vec<&str> = line.split(';').collect();
    if fields.len() < FIELD_COUNT {
        return Err(UpdateError::ManifestRecordMalformed {
            line: line_no,
            fields: fields.len(),
        });
    }
    Ok(ReleaseRecord {
        version_code: lenient_int(fields[0]),
        version_name: fields[1].to_owned(),
        download_url: fields[2].to_owned(),
        size_bytes: lenient_int::<u64>(fields[3]),
        display_name: fields[4].to_owned(),
        comment: fields[5].to_owned(),
        checksum: fields[6].trim().to_owned(),
    })
}

// Non-numeric values read as 0.
fn lenient_int<T: std::str::FromStr + Default>(field: &str) -> T {
    field.trim().parse().unwrap_or_default()
}

/// Pick the record with the greatest version code if it beats `current_version_code`.
///
/// When several records share the greatest code, the one listed first wins.
pub fn select_candidate(
    records: &[ReleaseRecord],
    current_version_code: i64,
) -> Option<&ReleaseRecord> {
    let mut highest: Option<&ReleaseRecord> = None;
    for record in records {
        if highest.is_none_or(|best| record.version_code > best.version_code) {
            highest = Some(record);
        }
    }
    highest.filter(|record| record.version_code > current_version_code)
}
