//! CLI argument validation functions
//!
//! Value parsers for arguments that clap cannot validate on its own.

use std::fs;
use std::path::PathBuf;

use jiff::Timestamp;

use crate::models::Target;

/// Largest page the backfill command accepts.
const MAX_BACKFILL_BATCH_SIZE: i64 = 10_000;

/// Validate that a file path is accessible (exists and is readable)
pub fn validate_config_file_path(path_str: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(format!("Configuration file does not exist: '{}'", path_str));
    }

    if !path.is_file() {
        return Err(format!("Configuration path is not a file: '{}'", path_str));
    }

    match fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) => Err(format!(
            "Cannot read configuration file '{}': {}",
            path_str, e
        )),
    }
}

/// Validate rollback steps is a positive number
pub fn validate_rollback_steps(steps_str: &str) -> Result<u32, String> {
    let steps: u32 = steps_str.parse().map_err(|_| {
        format!(
            "Rollback steps must be a valid positive number, got: '{}'",
            steps_str
        )
    })?;

    if steps == 0 {
        return Err("Rollback steps must be greater than 0".to_string());
    }

    if steps > 100 {
        return Err("Rollback steps cannot exceed 100".to_string());
    }

    Ok(steps)
}

/// Parses `community` or `event:<id>`
pub fn parse_target(target_str: &str) -> Result<Target, String> {
    target_str.parse::<Target>().map_err(|e| e.reason())
}

/// Parses an RFC 3339 instant such as `2026-11-01T09:00:00Z`
pub fn parse_trigger_time(time_str: &str) -> Result<Timestamp, String> {
    time_str.trim().parse::<Timestamp>().map_err(|e| {
        format!(
            "Trigger time must be an RFC 3339 timestamp with offset (e.g. 2026-11-01T09:00:00Z), got '{}': {}",
            time_str, e
        )
    })
}

/// Validate batch ids and job ids are positive
pub fn validate_record_id(id_str: &str) -> Result<i64, String> {
    let id: i64 = id_str
        .parse()
        .map_err(|_| format!("Id must be a positive integer, got: '{}'", id_str))?;

    if id <= 0 {
        return Err(format!("Id must be a positive integer, got: '{}'", id_str));
    }

    Ok(id)
}

/// Validate the backfill page size
pub fn validate_batch_size(size_str: &str) -> Result<i64, String> {
    let size: i64 = size_str
        .parse()
        .map_err(|_| format!("Batch size must be a number, got: '{}'", size_str))?;

    if !(1..=MAX_BACKFILL_BATCH_SIZE).contains(&size) {
        return Err(format!(
            "Batch size must be between 1 and {}",
            MAX_BACKFILL_BATCH_SIZE
        ));
    }

    Ok(size)
}
