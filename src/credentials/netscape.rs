//! Netscape HTTP Cookie File reading and writing
//!
//! The canonical artifact format consumed by the external tool: one
//! header comment line, then tab-separated records
//! `domain<TAB>flag<TAB>path<TAB>secure<TAB>expiry<TAB>name<TAB>value`,
//! where `flag` is `TRUE` exactly when the domain starts with a leading
//! dot.

use std::path::Path;

use crate::error::{Error, Result};

/// Header line written at the top of every artifact
const HEADER: &str = "# Netscape HTTP Cookie File";

/// A single cookie record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie domain; a leading dot marks a domain-wide cookie
    pub domain: String,
    /// Cookie path
    pub path: String,
    /// Whether the cookie requires a secure channel
    pub secure: bool,
    /// Expiry as unix seconds (0 = session cookie)
    pub expiry: i64,
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
}

impl Cookie {
    /// The include-subdomains flag derived from the domain
    pub fn domain_flag(&self) -> &'static str {
        if self.domain.starts_with('.') {
            "TRUE"
        } else {
            "FALSE"
        }
    }
}

/// Parse a Netscape cookie file's contents
///
/// Comment lines and blanks are skipped. A malformed record line is an
/// error: a truncated artifact must never pass for a valid one.
pub fn parse(contents: &str) -> Result<Vec<Cookie>> {
    let mut cookies = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let trimmed = line.trim_end_matches('\r');
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split('\t').collect();
        if fields.len() != 7 {
            return Err(Error::Other(format!(
                "malformed cookie record at line {}: expected 7 fields, got {}",
                line_no + 1,
                fields.len()
            )));
        }
        cookies.push(Cookie {
            domain: fields[0].to_string(),
            path: fields[2].to_string(),
            secure: fields[3].eq_ignore_ascii_case("TRUE"),
            expiry: fields[4].parse().unwrap_or(0),
            name: fields[5].to_string(),
            value: fields[6].to_string(),
        });
    }
    Ok(cookies)
}

/// Read and parse a cookie file from disk
pub async fn read_file(path: &Path) -> Result<Vec<Cookie>> {
    let contents = tokio::fs::read_to_string(path).await?;
    parse(&contents)
}

/// Serialize cookies into Netscape file contents
pub fn serialize(cookies: &[Cookie]) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for cookie in cookies {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            cookie.domain,
            cookie.domain_flag(),
            cookie.path,
            if cookie.secure { "TRUE" } else { "FALSE" },
            cookie.expiry,
            cookie.name,
            cookie.value,
        ));
    }
    out
}

/// Write cookies to a file on disk
pub async fn write_file(path: &Path, cookies: &[Cookie]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serialize(cookies)).await?;
    Ok(())
}
