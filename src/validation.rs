//! Input validation and sanitization.
//!
//! File names, project ids and column names arrive from outside the process
//! and end up in filesystem paths or in the column tracker. Everything is
//! checked here before it is used, preventing path traversal and collisions
//! with the `__` suffix reserved for derived columns.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Result, StoreError};

/// Maximum allowed length for a document or data file name.
pub const MAX_FILE_NAME_LENGTH: usize = 255;

/// Maximum allowed length for descriptions.
pub const MAX_DESCRIPTION_LENGTH: usize = 500;

/// Separator reserved for derived columns (`col__MODIFIED`) and per-file
/// documents (`file__run_info.json`).
pub const RESERVED_SEPARATOR: &str = "__";

/// Reserved names that cannot be used as file names (case-insensitive).
const RESERVED_NAMES: &[&str] = &[
    ".", "..", "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7",
    "com8", "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Validates that a file name is a single safe path component.
///
/// # Examples
///
/// ```
/// use pipeledger::validation::validate_file_name;
///
/// assert!(validate_file_name("source.csv").is_ok());
/// assert!(validate_file_name("source.csv__run_info.json").is_ok());
/// assert!(validate_file_name("").is_err());
/// assert!(validate_file_name("../etc/passwd").is_err());
/// ```
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidName("file name cannot be empty".into()));
    }

    if name.len() > MAX_FILE_NAME_LENGTH {
        return Err(StoreError::InvalidName(format!(
            "file name too long: {} characters (max {MAX_FILE_NAME_LENGTH})",
            name.len()
        )));
    }

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid_chars {
        return Err(StoreError::InvalidName(format!(
            "file name '{name}' contains invalid characters. Use only alphanumeric characters, dashes (-), underscores (_) and dots (.)"
        )));
    }

    if name.starts_with('.') {
        return Err(StoreError::InvalidName(format!(
            "file name '{name}' cannot start with a dot"
        )));
    }

    let stem = name.split('.').next().unwrap_or(name).to_lowercase();
    if RESERVED_NAMES.contains(&name.to_lowercase().as_str())
        || RESERVED_NAMES.contains(&stem.as_str())
    {
        return Err(StoreError::InvalidName(format!(
            "file name '{name}' uses a reserved name"
        )));
    }

    Ok(())
}

/// Validates that a description is within acceptable length limits.
pub fn validate_description(description: &str) -> Result<()> {
    if description.len() > MAX_DESCRIPTION_LENGTH {
        return Err(StoreError::InvalidName(format!(
            "description too long: {} characters (max {MAX_DESCRIPTION_LENGTH})",
            description.len()
        )));
    }
    Ok(())
}

/// Validates an uploaded header: names are distinct and never use the
/// reserved separator.
pub fn validate_columns(columns: &[String]) -> Result<()> {
    if let Some(col) = columns.iter().find(|c| c.contains(RESERVED_SEPARATOR)) {
        return Err(StoreError::InvalidName(format!(
            "column '{col}' contains '{RESERVED_SEPARATOR}', which is reserved for derived columns"
        )));
    }

    let mut seen = std::collections::HashSet::new();
    if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
        return Err(StoreError::InvalidName(format!(
            "column names must be distinct ('{dup}' repeats)"
        )));
    }

    Ok(())
}

fn header_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[()\\"/']"#).expect("static header regex"))
}

/// Replace characters that break downstream tooling (`( ) \ " / '`) with `_`.
pub fn clean_column_names<S: AsRef<str>>(columns: &[S]) -> Vec<String> {
    columns
        .iter()
        .map(|c| header_chars().replace_all(c.as_ref(), "_").into_owned())
        .collect()
}

/// Clap value parser for file name arguments.
pub fn clap_file_name_validator(s: &str) -> std::result::Result<String, String> {
    validate_file_name(s).map_err(|e| e.to_string())?;
    Ok(s.to_string())
}

/// Clap value parser for description arguments.
pub fn clap_description_validator(s: &str) -> std::result::Result<String, String> {
    validate_description(s).map_err(|e| e.to_string())?;
    Ok(s.to_string())
}
