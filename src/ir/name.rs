//! Bounded identifiers for functions, blocks and variables.

use std::fmt;

use crate::error::{CompileError, Result};

/// Longest name, in bytes, a function, block or variable may carry.
pub const MAX_NAME_LEN: usize = 31;

/// An owned name of at most [`MAX_NAME_LEN`] bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(String);

impl Name {
    /// Wrap `name`, rejecting anything longer than [`MAX_NAME_LEN`].
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.len() > MAX_NAME_LEN {
            return Err(CompileError::NameTooLong {
                len: name.len(),
                name,
            });
        }
        Ok(Self(name))
    }

    /// Like [`Name::new`], but additionally require a source identifier:
    /// `[A-Za-z_][A-Za-z0-9_]*`.
    pub fn identifier(name: &str) -> Result<Self> {
        let mut chars = name.chars();
        let valid = match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        };
        if !valid {
            return Err(CompileError::InvalidIdentifier(name.to_string()));
        }
        Self::new(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
