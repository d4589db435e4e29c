//! Parsing of the external tool's line-oriented output
//!
//! The adapter asks the tool to report machine-readable progress through
//! a crate-defined template: every progress line starts with `MEDIADL|`
//! and carries pipe-separated fields. Destination and merge announcements
//! from the tool's human-readable output are recognized as well, since
//! output paths surface there first.

use std::path::PathBuf;

/// Prefix of template-formatted progress lines
pub const PROGRESS_PREFIX: &str = "MEDIADL|";

/// Byte-level progress parsed from one tool output line
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Progress {
    /// Bytes fetched so far
    pub downloaded_bytes: u64,
    /// Total bytes, when the tool knows it
    pub total_bytes: Option<u64>,
    /// Transfer speed in bytes/second, when known
    pub speed_bps: Option<u64>,
    /// Estimated seconds remaining, when known
    pub eta_secs: Option<u64>,
    /// File currently being written, when reported
    pub filename: Option<PathBuf>,
}

/// One parsed line of tool output
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedLine {
    /// A template-formatted progress record
    Progress(Progress),
    /// The tool announced an output destination
    Destination(PathBuf),
    /// The tool merged streams into a final file
    Merge(PathBuf),
    /// Anything else (status text, warnings, errors)
    Info(String),
}

/// Arguments that make the tool emit parseable progress
///
/// `--newline` forces one record per line; the template mirrors the
/// fields [`parse_line`] expects.
pub fn progress_args() -> Vec<String> {
    vec![
        "--newline".to_string(),
        "--progress".to_string(),
        "--progress-template".to_string(),
        format!(
            "download:{PROGRESS_PREFIX}progress|%(progress.downloaded_bytes)s\
             |%(progress.total_bytes)s|%(progress.speed)s|%(progress.eta)s\
             |%(progress.filename)s"
        ),
    ]
}

/// Parse one line of tool output
pub fn parse_line(line: &str) -> ParsedLine {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
        let fields: Vec<&str> = rest.split('|').collect();
        if fields.first() == Some(&"progress") && fields.len() >= 6 {
            return ParsedLine::Progress(Progress {
                downloaded_bytes: parse_number(fields[1]).unwrap_or(0),
                total_bytes: parse_number(fields[2]),
                speed_bps: parse_number(fields[3]),
                eta_secs: parse_number(fields[4]),
                filename: non_empty(fields[5]).map(PathBuf::from),
            });
        }
        // Unknown template record; surface it rather than dropping it
        return ParsedLine::Info(rest.to_string());
    }

    if let Some(rest) = line.strip_prefix("[download] Destination: ") {
        return ParsedLine::Destination(PathBuf::from(rest.trim()));
    }

    if let Some(rest) = line.strip_prefix("[Merger] Merging formats into ") {
        return ParsedLine::Merge(PathBuf::from(rest.trim().trim_matches('"')));
    }

    ParsedLine::Info(line.to_string())
}

/// Parse a numeric template field; "NA"/"None"/empty mean unknown
///
/// The tool prints floats for speed and byte counts ("1024.5"), so parse
/// as f64 and truncate.
fn parse_number(field: &str) -> Option<u64> {
    let field = field.trim();
    if field.is_empty() || field == "NA" || field == "None" {
        return None;
    }
    field.parse::<f64>().ok().map(|v| v.max(0.0) as u64)
}

fn non_empty(field: &str) -> Option<&str> {
    let field = field.trim();
    (!field.is_empty() && field != "NA" && field != "None").then_some(field)
}
