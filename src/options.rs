// src/options.rs
//! Runtime configuration.
//!
//! Options are plain values with builder methods. `OffloadOptions::from_env`
//! reads the `OFFLOAD_*` variables:
//!
//! | variable | meaning |
//! |---|---|
//! | `OFFLOAD_THREADS` | worker-pool size; unset or `0` means device offload |
//! | `OFFLOAD_ASYNC` | `true` defers composition stages, `false` runs them eagerly |
//! | `OFFLOAD_MATERIALIZE` | `copy` or `view` for device-produced results |
//! | `OFFLOAD_DEOPT_LIMIT` | deopts after which a function stays interpreted |
//! | `OFFLOAD_SPECIALIZE_SCOPE` | rewrite functions with their captured scope before tracing |
//! | `OFFLOAD_DUMP_KERNELS` | log every shaped graph before compilation |

#![allow(unused_assignments)] // False positives from thiserror derive

use miette::Diagnostic;
use offload_runtime::Materialization;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: expected {expected}")]
    #[diagnostic(code(E6101))]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Where per-element work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Trace, compile and offload once hot.
    #[default]
    Offload,
    /// Fixed-size CPU pool; no tracing, caching or device work.
    WorkerPool { threads: usize },
}

/// When composition stages are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositionMode {
    /// Stages are recorded and computed when the chain is executed.
    #[default]
    Deferred,
    /// Each stage is computed on registration and memoized.
    Eager,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadOptions {
    pub execution: ExecutionMode,
    pub composition: CompositionMode,
    pub materialization: Materialization,
    pub deopt_limit: u32,
    pub specialize_scope: bool,
    pub dump_kernels: bool,
}

impl Default for OffloadOptions {
    fn default() -> Self {
        Self {
            execution: ExecutionMode::Offload,
            composition: CompositionMode::Deferred,
            materialization: Materialization::Copy,
            deopt_limit: 3,
            specialize_scope: false,
            dump_kernels: false,
        }
    }
}

impl OffloadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_workers(mut self, threads: usize) -> Self {
        self.execution = if threads == 0 {
            ExecutionMode::Offload
        } else {
            ExecutionMode::WorkerPool { threads }
        };
        self
    }

    #[must_use]
    pub fn with_composition(mut self, mode: CompositionMode) -> Self {
        self.composition = mode;
        self
    }

    #[must_use]
    pub fn with_materialization(mut self, materialization: Materialization) -> Self {
        self.materialization = materialization;
        self
    }

    #[must_use]
    pub fn with_deopt_limit(mut self, limit: u32) -> Self {
        self.deopt_limit = limit;
        self
    }

    #[must_use]
    pub fn with_scope_specialization(mut self, on: bool) -> Self {
        self.specialize_scope = on;
        self
    }

    #[must_use]
    pub fn with_kernel_dump(mut self, on: bool) -> Self {
        self.dump_kernels = on;
        self
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut options = Self::default();
        if let Some(value) = lookup("OFFLOAD_THREADS") {
            let threads = parse_number(&value, "OFFLOAD_THREADS")?;
            options = options.with_workers(threads);
        }
        if let Some(value) = lookup("OFFLOAD_ASYNC") {
            options.composition = if parse_bool(&value, "OFFLOAD_ASYNC")? {
                CompositionMode::Deferred
            } else {
                CompositionMode::Eager
            };
        }
        if let Some(value) = lookup("OFFLOAD_MATERIALIZE") {
            options.materialization = match value.trim().to_ascii_lowercase().as_str() {
                "copy" => Materialization::Copy,
                "view" => Materialization::View,
                _ => return Err(invalid("OFFLOAD_MATERIALIZE", &value, "'copy' or 'view'")),
            };
        }
        if let Some(value) = lookup("OFFLOAD_DEOPT_LIMIT") {
            options.deopt_limit = parse_number(&value, "OFFLOAD_DEOPT_LIMIT")?;
        }
        if let Some(value) = lookup("OFFLOAD_SPECIALIZE_SCOPE") {
            options.specialize_scope = parse_bool(&value, "OFFLOAD_SPECIALIZE_SCOPE")?;
        }
        if let Some(value) = lookup("OFFLOAD_DUMP_KERNELS") {
            options.dump_kernels = parse_bool(&value, "OFFLOAD_DUMP_KERNELS")?;
        }
        Ok(options)
    }
}

fn invalid(var: &'static str, value: &str, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        expected,
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, var: &'static str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(var, value, "a non-negative integer"))
}

fn parse_bool(value: &str, var: &'static str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, value, "a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: FxHashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let options = OffloadOptions::from_lookup(|_| None).unwrap();
        assert_eq!(options, OffloadOptions::default());
        assert_eq!(options.deopt_limit, 3);
    }

    #[test]
    fn reads_every_variable() {
        let options = OffloadOptions::from_lookup(lookup(&[
            ("OFFLOAD_THREADS", "4"),
            ("OFFLOAD_ASYNC", "false"),
            ("OFFLOAD_MATERIALIZE", "View"),
            ("OFFLOAD_DEOPT_LIMIT", "1"),
            ("OFFLOAD_SPECIALIZE_SCOPE", "on"),
            ("OFFLOAD_DUMP_KERNELS", "1"),
        ]))
        .unwrap();
        assert_eq!(options.execution, ExecutionMode::WorkerPool { threads: 4 });
        assert_eq!(options.composition, CompositionMode::Eager);
        assert_eq!(options.materialization, Materialization::View);
        assert_eq!(options.deopt_limit, 1);
        assert!(options.specialize_scope);
        assert!(options.dump_kernels);
    }

    #[test]
    fn zero_threads_means_offload() {
        let options = OffloadOptions::from_lookup(lookup(&[("OFFLOAD_THREADS", "0")])).unwrap();
        assert_eq!(options.execution, ExecutionMode::Offload);
    }

    #[test]
    fn bad_values_are_reported() {
        let err = OffloadOptions::from_lookup(lookup(&[("OFFLOAD_THREADS", "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "OFFLOAD_THREADS",
                value: "many".to_string(),
                expected: "a non-negative integer",
            }
        );
        assert!(OffloadOptions::from_lookup(lookup(&[("OFFLOAD_ASYNC", "maybe")])).is_err());
    }
}
