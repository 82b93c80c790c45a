use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid path or filename")]
    InvalidPath,
    #[error("failed to resolve working directory: {source}")]
    WorkingDir {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write export file at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize JSON export: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub const ALL: [Self; 2] = [Self::Csv, Self::Json];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Csv => "CSV",
            Self::Json => "JSON",
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CsvDelimiter {
    #[default]
    Comma,
    Semicolon,
    Tab,
    Pipe,
}

impl CsvDelimiter {
    pub const ALL: [Self; 4] = [Self::Comma, Self::Semicolon, Self::Tab, Self::Pipe];

    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Self::Comma => ',',
            Self::Semicolon => ';',
            Self::Tab => '\t',
            Self::Pipe => '|',
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Comma => "comma",
            Self::Semicolon => "semicolon",
            Self::Tab => "tab",
            Self::Pipe => "pipe",
        }
    }
}

/// Where an export will be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub path: PathBuf,
    /// True when `path` exists and overwrite was requested.
    pub will_overwrite: bool,
}

/// Expands `~`, resolves relative input against the working directory and
/// appends the format's extension when the name has none. An existing file
/// is kept unless `overwrite` is set; `name_N.ext` is picked instead.
pub fn resolve_export_path(
    input: &str,
    format: ExportFormat,
    overwrite: bool,
) -> Result<ResolvedPath, ExportError> {
    let cwd = env::current_dir().map_err(|source| ExportError::WorkingDir { source })?;
    resolve_export_path_from(input, format, overwrite, &cwd, home_dir().as_deref())
}

fn resolve_export_path_from(
    input: &str,
    format: ExportFormat,
    overwrite: bool,
    cwd: &Path,
    home: Option<&Path>,
) -> Result<ResolvedPath, ExportError> {
    let cleaned = input.trim().replace('\0', "");
    if cleaned.is_empty() {
        return Err(ExportError::InvalidPath);
    }

    let mut path = match (cleaned.as_str(), home) {
        ("~", Some(home)) => home.to_path_buf(),
        (raw, Some(home)) if raw.starts_with("~/") || raw.starts_with("~\\") => {
            home.join(&raw[2..])
        }
        (raw, _) => PathBuf::from(raw),
    };
    if path.is_relative() {
        path = cwd.join(path);
    }
    if path.extension().is_none() {
        let mut name = path.into_os_string();
        name.push(".");
        name.push(format.extension());
        path = PathBuf::from(name);
    }

    if !path.is_file() {
        return Ok(ResolvedPath {
            path,
            will_overwrite: false,
        });
    }
    if overwrite {
        return Ok(ResolvedPath {
            path,
            will_overwrite: true,
        });
    }

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut suffix = 1_u32;
    loop {
        let candidate = dir.join(format!("{stem}_{suffix}.{extension}"));
        if !candidate.exists() {
            return Ok(ResolvedPath {
                path: candidate,
                will_overwrite: false,
            });
        }
        suffix += 1;
    }
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Writes `rows` in `format`; returns the number of rows written.
pub fn export_rows(
    path: &Path,
    format: ExportFormat,
    delimiter: CsvDelimiter,
    headers: &[String],
    rows: &[Vec<String>],
) -> Result<usize, ExportError> {
    match format {
        ExportFormat::Csv => export_rows_to_csv(path, delimiter, headers, rows),
        ExportFormat::Json => export_rows_to_json(path, headers, rows),
    }
}

pub fn export_rows_to_csv(
    path: &Path,
    delimiter: CsvDelimiter,
    headers: &[String],
    rows: &[Vec<String>],
) -> Result<usize, ExportError> {
    let separator = delimiter.as_char().to_string();
    let mut content = String::new();
    content.push_str(
        &headers
            .iter()
            .map(|header| csv_escape(header, delimiter))
            .collect::<Vec<_>>()
            .join(&separator),
    );
    content.push('\n');

    for row in rows {
        let values = (0..headers.len())
            .map(|column_index| {
                csv_escape(
                    row.get(column_index).map_or("", String::as_str),
                    delimiter,
                )
            })
            .collect::<Vec<_>>();
        content.push_str(&values.join(&separator));
        content.push('\n');
    }

    fs::write(path, content).map_err(|source| ExportError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(rows.len())
}

/// JSON array of objects keyed by header. `NULL` cells become `null`.
pub fn export_rows_to_json(
    path: &Path,
    headers: &[String],
    rows: &[Vec<String>],
) -> Result<usize, ExportError> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let mut object = Map::with_capacity(headers.len());
        for (column_index, header) in headers.iter().enumerate() {
            let value = match row.get(column_index).map(String::as_str) {
                None | Some("NULL") => Value::Null,
                Some(value) => json!(value),
            };
            object.insert(header.clone(), value);
        }
        records.push(Value::Object(object));
    }

    let payload = serde_json::to_string_pretty(&records)?;
    fs::write(path, payload).map_err(|source| ExportError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(rows.len())
}

fn csv_escape(value: &str, delimiter: CsvDelimiter) -> String {
    if value.contains([delimiter.as_char(), '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
