//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for TESTVM_ environment variables that
//! collects every error so all issues can be reported at once.

use super::source::Sourced;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Type-safe environment variable parser.
pub struct EnvParser {
    prefix: &'static str,
    vars: HashMap<String, String>,
    errors: Vec<EnvError>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    /// Parser over the process environment with the TESTVM_ prefix.
    pub fn new() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Parser over an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: "TESTVM_",
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn lookup(&self, var_name: &str) -> Option<String> {
        self.vars
            .get(var_name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// String value, `None` when unset or empty.
    pub fn get_opt_string(&mut self, name: &str) -> Option<Sourced<String>> {
        let var_name = self.var_name(name);
        self.lookup(&var_name)
            .map(|value| Sourced::from_env(value, var_name))
    }

    pub fn get_opt_path(&mut self, name: &str) -> Option<Sourced<PathBuf>> {
        self.get_opt_string(name).map(|s| Sourced {
            value: PathBuf::from(s.value),
            source: s.source,
        })
    }

    /// Boolean value with default.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off (for false)
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let var_name = self.var_name(name);
        match self.lookup(&var_name) {
            Some(value) => {
                let parsed = match value.to_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => true,
                    "0" | "false" | "no" | "off" => false,
                    _ => {
                        self.errors.push(EnvError::InvalidValue {
                            var: var_name.clone(),
                            expected: "boolean (true/false/1/0/yes/no)".to_string(),
                            value,
                        });
                        return Sourced::default_value(default);
                    }
                };
                Sourced::from_env(parsed, var_name)
            }
            None => Sourced::default_value(default),
        }
    }

    /// u64 value with default and inclusive range validation.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let var_name = self.var_name(name);
        match self.lookup(&var_name) {
            Some(value) => match value.parse::<u64>() {
                Ok(parsed) if (min..=max).contains(&parsed) => Sourced::from_env(parsed, var_name),
                Ok(_) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name,
                        value,
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::default_value(default)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name,
                        expected: "unsigned integer".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            None => Sourced::default_value(default),
        }
    }

    /// Log level (trace, debug, info, warn, error).
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match self.lookup(&var_name) {
            Some(value) => {
                let lower = value.to_lowercase();
                if matches!(
                    lower.as_str(),
                    "trace" | "debug" | "info" | "warn" | "error"
                ) {
                    Sourced::from_env(lower, var_name)
                } else {
                    self.errors
                        .push(EnvError::InvalidLogLevel { var: var_name, value });
                    Sourced::default_value(default.to_string())
                }
            }
            None => Sourced::default_value(default.to_string()),
        }
    }
}
