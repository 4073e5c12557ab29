//! Vulnerability report records and the per-target report writer.
//!
//! Reports are written as indented, key-sorted JSON, one file per target
//! keyed by the target's content hash unless an explicit filename or append
//! mode is requested. Field declaration order below is alphabetical on
//! purpose: serde emits struct fields in declaration order, which keeps the
//! serialized keys sorted.

use crate::error::{CoreError, Result};
use crate::fingerprint::content_hash;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A single vulnerability found by a scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    /// HTTP method used to trigger the issue
    pub method: String,
    /// The injectable parameter
    pub parameter: String,
    /// Proof-of-concept URL or payload
    pub poc: String,
    /// URL the issue was found at
    pub url: String,
    /// Vulnerability name (e.g. "SQL Injection")
    pub vulnerability: String,
}

/// The per-target scan report persisted by the scan loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Scan end time, RFC 3339
    pub endtime: String,
    /// Operator-supplied friendly label
    pub label: String,
    /// Scan start time, RFC 3339
    pub starttime: String,
    /// The scanned URL
    pub url: String,
    /// Everything the scanner found (possibly empty)
    pub vulnerabilities: Vec<Vulnerability>,
}

/// Where and how reports get written.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Directory reports are written into (created on demand)
    pub dir: PathBuf,
    /// Explicit filename; defaults to `<content-hash>.json`
    pub filename: Option<String>,
    /// Append to an existing file instead of replacing it
    pub append: bool,
    /// JSON indent width; `None` writes compact output
    pub indent: Option<usize>,
}

impl ReportOptions {
    /// Report options writing indented files into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            filename: None,
            append: false,
            indent: Some(4),
        }
    }
}

/// Serialize a report and write it to its file.
///
/// Returns the path written. `hash` overrides the content hash used for the
/// default filename (callers that already computed the target hash pass it
/// to avoid rehashing).
pub fn write_report(report: &Report, options: &ReportOptions, hash: Option<&str>) -> Result<PathBuf> {
    let filename = match &options.filename {
        Some(name) => name.clone(),
        None => {
            let hash = hash.map_or_else(|| content_hash(&report.url), str::to_string);
            format!("{hash}.json")
        }
    };

    fs::create_dir_all(&options.dir)?;
    let path = options.dir.join(filename);

    let mut file = OpenOptions::new()
        .create(true)
        .append(options.append)
        .write(true)
        .truncate(!options.append)
        .open(&path)?;

    let json = render_json(report, options.indent)?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;

    tracing::info!(path = %path.display(), "report saved");
    Ok(path)
}

fn render_json(report: &Report, indent: Option<usize>) -> Result<String> {
    let rendered = match indent {
        None => serde_json::to_string(report),
        Some(width) => {
            let indent = b" ".repeat(width);
            let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent);
            let mut buf = Vec::new();
            let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
            report
                .serialize(&mut serializer)
                .map(|()| String::from_utf8_lossy(&buf).into_owned())
        }
    };
    rendered.map_err(|e| CoreError::Report(e.to_string()))
}

/// Check whether a report already exists for the given content hash.
#[must_use]
pub fn report_exists(dir: &Path, hash: &str) -> bool {
    dir.join(format!("{hash}.json")).is_file()
}
