//! Connection strings select and configure a storage backend.
//!
//! ```text
//! <prefix>://<key1>=<value1>;<key2>=<value2>;...
//! ```
//!
//! The prefix names the backend family (`disk`, `inmemory`, `aws.s3`, ...).
//! Parameter keys are matched case-insensitively but stored as written, and
//! their order is kept so that printing a parsed connection string gives
//! back the text it came from. Text without a `://` marker is treated as a
//! vendor-native connection string and carried through verbatim.

mod grammar;

use std::{fmt, str::FromStr};

pub use grammar::ParseError;
use grammar::{PREFIX_SEPARATOR, Parsed};

use crate::error::ResolveError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConnectionString {
    prefix: String,
    parameters: Vec<(String, String)>,
    native: Option<String>,
}

impl StorageConnectionString {
    /// Creates a connection string with the given prefix and no parameters.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            parameters: Vec::new(),
            native: None,
        }
    }

    /// Wraps a vendor-native connection string without interpreting it.
    pub fn native(text: impl Into<String>) -> Self {
        Self {
            prefix: String::new(),
            parameters: Vec::new(),
            native: Some(text.into()),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ParseError> {
        match grammar::parse(text)? {
            Parsed::Native => Ok(Self::native(text)),
            Parsed::Structured { prefix, pairs } => {
                let mut cs = Self::new(prefix);
                for (key, value) in pairs {
                    cs.insert(key, value);
                }
                Ok(cs)
            }
        }
    }

    /// Returns a copy with `key` set to `value`.
    ///
    /// An existing key (compared case-insensitively) keeps its position and
    /// takes the new value.
    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ParseError> {
        let key = key.into();
        if self.is_native() {
            return Err(ParseError::MalformedSegment {
                segment: key,
                reason: "native connection strings carry no parameters",
            });
        }
        if let Err(reason) = grammar::validate_key(&key) {
            return Err(ParseError::MalformedSegment {
                segment: key,
                reason,
            });
        }
        self.insert(key, value.into());
        Ok(self)
    }

    fn insert(&mut self, key: String, value: String) {
        match self
            .parameters
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&key))
        {
            Some(entry) => entry.1 = value,
            None => self.parameters.push((key, value)),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns true if the prefix equals `prefix`, ignoring ASCII case.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        !self.is_native() && self.prefix.eq_ignore_ascii_case(prefix)
    }

    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }

    /// The raw text of a native connection string.
    pub fn native_text(&self) -> Option<&str> {
        self.native.as_deref()
    }

    /// Looks up a parameter. `Some("")` means the key was given with an
    /// empty value, `None` that it was not given at all.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Looks up a parameter that must be present.
    ///
    /// `is_critical` marks the failure as "this backend is selected but
    /// misconfigured": dispatch stops at the first critical error instead
    /// of offering the connection string to the next module.
    pub fn get_required(&self, key: &str, is_critical: bool) -> Result<&str, ResolveError> {
        self.get(key).ok_or_else(|| ResolveError::MissingParameter {
            key: key.to_string(),
            critical: is_critical,
        })
    }

    /// Parses an optional parameter into `T`.
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, ResolveError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|err| ResolveError::InvalidParameter {
                        key: key.to_string(),
                        reason: err.to_string(),
                    })
            })
            .transpose()
    }

    /// Parameters in the order they were given.
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.parameters
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl fmt::Display for StorageConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(native) = &self.native {
            return f.write_str(native);
        }

        let mut out = String::with_capacity(self.prefix.len() + 3 + 16 * self.parameters.len());
        out.push_str(&self.prefix);
        out.push_str(PREFIX_SEPARATOR);
        for (idx, (key, value)) in self.parameters.iter().enumerate() {
            if idx > 0 {
                out.push(';');
            }
            out.push_str(key);
            out.push('=');
            grammar::escape_value(value, &mut out);
        }
        f.write_str(&out)
    }
}

impl FromStr for StorageConnectionString {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for StorageConnectionString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for StorageConnectionString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
