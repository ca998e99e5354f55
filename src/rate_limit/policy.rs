//! Upload Policy
//!
//! The policy is the single record of upload restrictions: per-client rate
//! limits, the maximum accepted file size, the cooldown armed after a breach,
//! and the set of blocked file extensions.
//!
//! Two shapes exist. [`Policy`] is the validated in-process form (sizes in
//! bytes, unsigned counts). [`PolicyDocument`] is the wire and disk form used
//! by the admin panel (size in megabytes, signed numbers so that negative
//! input can be reported against the field that carried it).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Default uploads allowed per client per minute
pub const DEFAULT_MAX_UPLOADS_PER_MINUTE: u32 = 5;

/// Default uploads allowed per client per hour
pub const DEFAULT_MAX_UPLOADS_PER_HOUR: u32 = 30;

/// Default maximum file size in megabytes
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;

/// Default cooldown after a limit breach, in seconds
pub const DEFAULT_COOLDOWN_SECONDS: u64 = 60;

/// Bytes per megabyte on the wire
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Validation failure for a policy, naming the offending wire field
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value for '{field}': {message}")]
pub struct PolicyError {
    /// Wire field name (as the admin panel spells it)
    pub field: &'static str,

    /// Human readable reason
    pub message: String,
}

impl PolicyError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validated upload policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Uploads permitted per client per fixed minute window (0 = none)
    pub max_uploads_per_minute: u32,

    /// Uploads permitted per client per fixed hour window (0 = none)
    pub max_uploads_per_hour: u32,

    /// Largest accepted payload in bytes (always > 0)
    pub max_file_size_bytes: u64,

    /// Lockout armed after a rate limit breach
    pub cooldown_seconds: u64,

    /// Lowercase extensions with a leading dot, first-seen order, no duplicates
    pub blocked_extensions: Vec<String>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_uploads_per_minute: DEFAULT_MAX_UPLOADS_PER_MINUTE,
            max_uploads_per_hour: DEFAULT_MAX_UPLOADS_PER_HOUR,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_MB * BYTES_PER_MB,
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            blocked_extensions: Vec::new(),
        }
    }
}

impl Policy {
    /// Check every invariant of a stored policy.
    ///
    /// Extensions must already be in normalized form; use
    /// [`normalize_extensions`] on untrusted input first.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_file_size_bytes == 0 {
            return Err(PolicyError::new("maxFileSize", "must be greater than zero"));
        }

        let mut seen = HashSet::new();
        for ext in &self.blocked_extensions {
            if normalize_extension(ext).as_deref() != Some(ext.as_str()) {
                return Err(PolicyError::new(
                    "blockedExtensions",
                    format!("entry {:?} is not a normalized extension", ext),
                ));
            }
            if !seen.insert(ext.as_str()) {
                return Err(PolicyError::new(
                    "blockedExtensions",
                    format!("duplicate entry {:?}", ext),
                ));
            }
        }

        Ok(())
    }

    /// Whether an extension (any case, dot optional) is blocked
    pub fn is_extension_blocked(&self, extension: &str) -> bool {
        match normalize_extension(extension) {
            Some(ext) => self.blocked_extensions.iter().any(|b| *b == ext),
            None => false,
        }
    }
}

/// Normalize a single extension: trim, lowercase, force a leading dot.
///
/// Returns `None` for blank input (including a bare `.`).
pub fn normalize_extension(raw: &str) -> Option<String> {
    let bare = raw.trim().trim_start_matches('.').trim();
    if bare.is_empty() {
        return None;
    }
    Some(format!(".{}", bare.to_lowercase()))
}

/// Normalize a list of extensions: drop blanks, dedupe case-insensitively,
/// keep first-seen order.
pub fn normalize_extensions<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in raw {
        if let Some(ext) = normalize_extension(item.as_ref()) {
            if seen.insert(ext.clone()) {
                out.push(ext);
            }
        }
    }
    out
}

/// Extract the extension of a file name, e.g. `FILE.EXE` -> `.exe`.
///
/// Names without a dot (or ending in one) have no extension.
pub fn extension_of(file_name: &str) -> Option<String> {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let (_, ext) = base.rsplit_once('.')?;
    normalize_extension(ext)
}

/// Policy as exchanged with the admin panel and persisted to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    pub max_uploads_per_minute: i64,
    pub max_uploads_per_hour: i64,

    /// Megabytes, may be fractional
    pub max_file_size: f64,

    /// Seconds
    pub cooldown_after_limit: i64,

    #[serde(default)]
    pub blocked_extensions: Vec<String>,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Policy::default().into()
    }
}

impl PolicyDocument {
    /// Convert to a [`Policy`], normalizing extensions and reporting the
    /// first invalid field.
    pub fn into_policy(self) -> Result<Policy, PolicyError> {
        let policy = Policy {
            max_uploads_per_minute: count_field("maxUploadsPerMinute", self.max_uploads_per_minute)?,
            max_uploads_per_hour: count_field("maxUploadsPerHour", self.max_uploads_per_hour)?,
            max_file_size_bytes: megabytes_to_bytes(self.max_file_size)?,
            cooldown_seconds: u64::try_from(self.cooldown_after_limit)
                .map_err(|_| PolicyError::new("cooldownAfterLimit", "must not be negative"))?,
            blocked_extensions: normalize_extensions(&self.blocked_extensions),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Read a document from untyped JSON, reporting the first field with the
    /// wrong type.
    ///
    /// `blockedExtensions` may be missing or null (no blocked extensions).
    pub fn from_json(value: &Value) -> Result<Self, PolicyError> {
        let object = value
            .as_object()
            .ok_or_else(|| PolicyError::new("config", "must be an object"))?;

        Ok(Self {
            max_uploads_per_minute: integer_field(object, "maxUploadsPerMinute")?,
            max_uploads_per_hour: integer_field(object, "maxUploadsPerHour")?,
            max_file_size: number_field(object, "maxFileSize")?,
            cooldown_after_limit: integer_field(object, "cooldownAfterLimit")?,
            blocked_extensions: string_list_field(object, "blockedExtensions")?,
        })
    }
}

fn integer_field(object: &Map<String, Value>, field: &'static str) -> Result<i64, PolicyError> {
    match object.get(field) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| PolicyError::new(field, "must be a whole number")),
        Some(_) => Err(PolicyError::new(field, "must be a number")),
        None => Err(PolicyError::new(field, "is required")),
    }
}

fn number_field(object: &Map<String, Value>, field: &'static str) -> Result<f64, PolicyError> {
    match object.get(field) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| PolicyError::new(field, "must be a number")),
        Some(_) => Err(PolicyError::new(field, "must be a number")),
        None => Err(PolicyError::new(field, "is required")),
    }
}

fn string_list_field(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Vec<String>, PolicyError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| PolicyError::new(field, "entries must be strings"))
            })
            .collect(),
        Some(_) => Err(PolicyError::new(field, "must be a list of strings")),
    }
}

impl From<Policy> for PolicyDocument {
    fn from(policy: Policy) -> Self {
        Self {
            max_uploads_per_minute: i64::from(policy.max_uploads_per_minute),
            max_uploads_per_hour: i64::from(policy.max_uploads_per_hour),
            max_file_size: policy.max_file_size_bytes as f64 / BYTES_PER_MB as f64,
            cooldown_after_limit: i64::try_from(policy.cooldown_seconds).unwrap_or(i64::MAX),
            blocked_extensions: policy.blocked_extensions,
        }
    }
}

impl From<&Policy> for PolicyDocument {
    fn from(policy: &Policy) -> Self {
        policy.clone().into()
    }
}

fn count_field(field: &'static str, value: i64) -> Result<u32, PolicyError> {
    if value < 0 {
        return Err(PolicyError::new(field, "must not be negative"));
    }
    u32::try_from(value).map_err(|_| PolicyError::new(field, "is too large"))
}

fn megabytes_to_bytes(mb: f64) -> Result<u64, PolicyError> {
    if !mb.is_finite() {
        return Err(PolicyError::new("maxFileSize", "must be a finite number"));
    }
    if mb <= 0.0 {
        return Err(PolicyError::new("maxFileSize", "must be greater than zero"));
    }
    let bytes = (mb * BYTES_PER_MB as f64).round();
    if bytes < 1.0 {
        return Err(PolicyError::new("maxFileSize", "is smaller than one byte"));
    }
    if bytes >= u64::MAX as f64 {
        return Err(PolicyError::new("maxFileSize", "is too large"));
    }
    Ok(bytes as u64)
}
