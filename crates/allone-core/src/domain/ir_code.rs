//! Infrared code names and payloads.
//!
//! A code is stored under a caller-chosen name of the form `<token>.ir`.  The
//! raw bytes are whatever the bridge captured; this crate never looks inside
//! them.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Required suffix of every code name.
pub const IR_EXTENSION: &str = ".ir";

/// Characters that separate names in batch requests or would escape the
/// store directory.
const FORBIDDEN: &[char] = &[',', '+', '-', ';', '/', '\\'];

/// Reasons a code name is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrCodeNameError {
    #[error("command name is empty")]
    Empty,
    #[error("command name {0:?} must end with \".ir\"")]
    MissingExtension(String),
    #[error("command name {0:?} has nothing before \".ir\"")]
    EmptyStem(String),
    #[error("command name {name:?} contains forbidden character {ch:?}")]
    ForbiddenCharacter { name: String, ch: char },
}

/// A validated code name such as `tv_power.ir`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct IrCodeName(String);

impl IrCodeName {
    /// Validates `name`.
    ///
    /// # Errors
    ///
    /// Returns [`IrCodeNameError`] when the name is empty, lacks the `.ir`
    /// suffix, has an empty stem, or contains a separator or whitespace.
    pub fn parse(name: &str) -> Result<Self, IrCodeNameError> {
        if name.is_empty() {
            return Err(IrCodeNameError::Empty);
        }
        if let Some(ch) = name
            .chars()
            .find(|c| FORBIDDEN.contains(c) || c.is_whitespace())
        {
            return Err(IrCodeNameError::ForbiddenCharacter {
                name: name.to_string(),
                ch,
            });
        }
        let stem = name
            .strip_suffix(IR_EXTENSION)
            .ok_or_else(|| IrCodeNameError::MissingExtension(name.to_string()))?;
        if stem.is_empty() || stem.starts_with('.') {
            return Err(IrCodeNameError::EmptyStem(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IrCodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IrCodeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Splits a comma-separated batch (`"a.ir,b.ir"`) into validated names,
/// keeping the caller's order.  Surrounding whitespace around each entry is
/// ignored.
///
/// # Errors
///
/// Returns the first [`IrCodeNameError`] encountered; an empty list is
/// reported as [`IrCodeNameError::Empty`].
pub fn parse_name_list(list: &str) -> Result<Vec<IrCodeName>, IrCodeNameError> {
    let names = list
        .split(',')
        .map(|part| IrCodeName::parse(part.trim()))
        .collect::<Result<Vec<_>, _>>()?;
    if names.is_empty() {
        return Err(IrCodeNameError::Empty);
    }
    Ok(names)
}

/// A learned code: the name it is stored under and the bytes to replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrCode {
    pub name: IrCodeName,
    pub raw: Vec<u8>,
}
