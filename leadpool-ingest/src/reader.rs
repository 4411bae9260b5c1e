//! Source file reading
//!
//! Adapts heterogeneous tabular files (varying delimiters, encodings,
//! column names and order, header presence) into one uniform raw-row
//! stream, each row tagged with its provider. Reading is streaming: memory
//! holds one record plus the csv reader's buffer, never a whole file.
//!
//! Tolerated without aborting: missing columns (None, classified by the
//! validator), extra columns (ignored), undecodable rows (yielded as
//! unreadable and counted), empty files (zero rows).

use crate::validate::{CorruptReason, RawRow};
use encoding_rs::{Encoding, UTF_8};
use leadpool_common::config::{InputConfig, ProviderSource};
use leadpool_common::{Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Column-name variants mapped onto the phone field (canonical-token form)
const PHONE_ALIASES: &[&str] = &[
    "phone",
    "phone number",
    "phonenumber",
    "phone no",
    "telephone",
    "tel",
    "mobile",
    "cell",
    "cell phone",
    "contact",
    "contact number",
    "number",
];

const AREA_ALIASES: &[&str] = &[
    "area", "region", "city", "location", "zone", "district", "territory", "market",
];

const SUBMITTED_ALIASES: &[&str] = &[
    "submitted at",
    "submitted",
    "submission date",
    "date submitted",
    "entry date",
    "date",
    "timestamp",
    "created",
    "created at",
];

const PROVIDER_ALIASES: &[&str] = &["provider", "source", "vendor", "supplier", "partner"];

/// Delimiters considered when sniffing the header line
const CANDIDATE_DELIMITERS: &[u8] = &[b',', b';', b'\t', b'|'];

/// A discovered source file with its attributed provider
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub provider: String,
}

/// Discover tabular files under the input directory.
///
/// Hidden files are skipped; results are path-sorted so a re-run processes
/// files in the same order.
pub fn discover(config: &InputConfig) -> Result<Vec<SourceFile>> {
    let dir = &config.directory;
    if !dir.is_dir() {
        return Err(Error::InvalidInput(format!(
            "Input directory not found: {}",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        let matched = ext
            .as_deref()
            .map(|e| config.extensions.iter().any(|allowed| allowed == e))
            .unwrap_or(false);
        if !matched {
            continue;
        }

        let provider = provider_from_path(entry.path(), &config.filename_delimiter);
        files.push(SourceFile {
            path: entry.path().to_path_buf(),
            provider,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(count = files.len(), "Discovered source files");
    Ok(files)
}

/// Derive the provider slug from a filename stem.
///
/// The stem is cut at the first occurrence of the configured delimiter
/// ("acme_2024-03.csv" -> "acme"); the whole stem is used when the
/// delimiter is absent or the prefix slugs to nothing.
pub fn provider_from_path(path: &Path, delimiter: &str) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let prefix = if delimiter.is_empty() {
        stem.as_str()
    } else {
        stem.split(delimiter).next().unwrap_or(stem.as_str())
    };

    let slug = slugify(prefix);
    if !slug.is_empty() {
        return slug;
    }
    let full = slugify(&stem);
    if full.is_empty() {
        "unknown-provider".to_string()
    } else {
        full
    }
}

/// Lowercase alphanumeric slug, runs of anything else become one dash
fn slugify(input: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Indexes of the fields of interest within a record
#[derive(Debug, Clone, Default)]
struct ColumnMap {
    phone: Option<usize>,
    area: Option<usize>,
    submitted_at: Option<usize>,
    provider: Option<usize>,
}

/// Streaming row iterator over one source file.
///
/// Yields `Ok(RawRow)` per record and `Err(UnreadableRow)` for records the
/// csv parser or character decoder cannot handle.
pub struct RowStream {
    records: csv::ByteRecordsIntoIter<BufReader<File>>,
    columns: ColumnMap,
    encoding: &'static Encoding,
    provider: Option<String>,
    provider_column: bool,
    file_label: String,
    line: u64,
    skip_header: bool,
}

impl RowStream {
    /// Open a source file, sniffing its delimiter and header layout from
    /// the first line.
    pub fn open(source: &SourceFile, config: &InputConfig) -> Result<RowStream> {
        let encoding = Encoding::for_label(config.encoding.as_bytes()).unwrap_or(UTF_8);

        let first_line = read_first_line(&source.path)?;
        let delimiter = sniff_delimiter(&first_line);

        let (columns, has_header) = map_columns(&first_line, delimiter, encoding);

        let file = File::open(&source.path).map_err(|e| Error::Parse {
            file: source.path.display().to_string(),
            reason: e.to_string(),
        })?;
        let reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(BufReader::new(file));

        debug!(
            file = %source.path.display(),
            delimiter = %char::from(delimiter),
            has_header,
            provider = %source.provider,
            "Opened source file"
        );

        let provider_column = config.provider_from == ProviderSource::Column;
        Ok(RowStream {
            records: reader.into_byte_records(),
            columns,
            encoding,
            provider: if provider_column {
                None
            } else {
                Some(source.provider.clone())
            },
            provider_column,
            file_label: source.path.display().to_string(),
            line: 0,
            skip_header: has_header,
        })
    }

    fn field(&self, record: &csv::ByteRecord, index: Option<usize>) -> FieldRead {
        let Some(index) = index else {
            return FieldRead::Missing;
        };
        let Some(bytes) = record.get(index) else {
            return FieldRead::Missing;
        };
        let (decoded, _, had_errors) = self.encoding.decode(bytes);
        if had_errors {
            return FieldRead::Undecodable;
        }
        let trimmed = decoded.trim();
        if trimmed.is_empty() {
            FieldRead::Missing
        } else {
            FieldRead::Value(trimmed.to_string())
        }
    }
}

enum FieldRead {
    Value(String),
    Missing,
    Undecodable,
}

impl Iterator for RowStream {
    type Item = std::result::Result<RawRow, CorruptReason>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Ok(r) => r,
                Err(e) => {
                    self.line += 1;
                    debug!(file = %self.file_label, line = self.line, "Unreadable record: {}", e);
                    return Some(Err(CorruptReason::UnreadableRow));
                }
            };
            self.line += 1;

            if self.skip_header {
                self.skip_header = false;
                continue;
            }

            // A row any of whose interesting fields fails to decode is
            // unreadable as a whole
            let mut undecodable = false;
            let mut get = |index: Option<usize>| match self.field(&record, index) {
                FieldRead::Value(v) => Some(v),
                FieldRead::Missing => None,
                FieldRead::Undecodable => {
                    undecodable = true;
                    None
                }
            };

            let phone = get(self.columns.phone);
            let area = get(self.columns.area);
            let submitted_at = get(self.columns.submitted_at);
            let row_provider = get(self.columns.provider);

            if undecodable {
                return Some(Err(CorruptReason::UnreadableRow));
            }

            let provider = if self.provider_column {
                row_provider
            } else {
                self.provider.clone()
            };

            return Some(Ok(RawRow {
                provider,
                file: self.file_label.clone(),
                line: self.line,
                phone,
                area,
                submitted_at,
            }));
        }
    }
}

fn read_first_line(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| Error::Parse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).map_err(|e| Error::Parse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })?;
    while line.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
        line.pop();
    }
    Ok(line)
}

/// Pick the candidate delimiter occurring most often in the header line
fn sniff_delimiter(first_line: &[u8]) -> u8 {
    CANDIDATE_DELIMITERS
        .iter()
        .copied()
        .map(|d| (first_line.iter().filter(|b| **b == d).count(), d))
        .filter(|(count, _)| *count > 0)
        .max_by_key(|(count, _)| *count)
        .map(|(_, d)| d)
        .unwrap_or(b',')
}

/// Map header cells to field indexes.
///
/// Returns the column map and whether the first line is a header. When no
/// cell matches any alias the file is treated as headerless with the
/// positional layout phone, area, submitted_at.
fn map_columns(
    first_line: &[u8],
    delimiter: u8,
    encoding: &'static Encoding,
) -> (ColumnMap, bool) {
    let (decoded, _, _) = encoding.decode(first_line);
    let mut map = ColumnMap::default();
    let mut any_match = false;

    for (index, cell) in decoded.split(char::from(delimiter)).enumerate() {
        let token = canonical_token(cell);
        if map.phone.is_none() && PHONE_ALIASES.contains(&token.as_str()) {
            map.phone = Some(index);
            any_match = true;
        } else if map.area.is_none() && AREA_ALIASES.contains(&token.as_str()) {
            map.area = Some(index);
            any_match = true;
        } else if map.submitted_at.is_none() && SUBMITTED_ALIASES.contains(&token.as_str()) {
            map.submitted_at = Some(index);
            any_match = true;
        } else if map.provider.is_none() && PROVIDER_ALIASES.contains(&token.as_str()) {
            map.provider = Some(index);
            any_match = true;
        }
    }

    if any_match {
        (map, true)
    } else {
        (
            ColumnMap {
                phone: Some(0),
                area: Some(1),
                submitted_at: Some(2),
                provider: None,
            },
            false,
        )
    }
}

/// Lowercase, non-alphanumerics to spaces, collapsed: "Phone_Number " and
/// "phone number" compare equal
fn canonical_token(cell: &str) -> String {
    let lowered: String = cell
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}
