//! Task functions shipped with the `procpool` binary.
//!
//! They double as the fixtures of the process-level tests, which is why a
//! couple of them exist only to misbehave.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::worker::{Registry, TaskFn};

/// `n!` as a `u64`. Fails above `20!`.
pub struct Factorial;

impl TaskFn for Factorial {
    const NAME: &'static str = "factorial";
    type Input = u64;
    type Output = u64;

    fn call(&self, n: u64) -> anyhow::Result<u64> {
        (2..=n)
            .try_fold(1u64, |acc, k| acc.checked_mul(k))
            .ok_or_else(|| anyhow!("{}! does not fit in 64 bits", n))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nap {
    pub value: u64,
    /// Milliseconds slept per unit of `value`
    pub unit_ms: u64,
}

/// Sleeps `value * unit_ms` milliseconds, then returns `value`.
pub struct SleepEcho;

impl TaskFn for SleepEcho {
    const NAME: &'static str = "sleep_echo";
    type Input = Nap;
    type Output = u64;

    fn call(&self, nap: Nap) -> anyhow::Result<u64> {
        let millis = nap
            .value
            .checked_mul(nap.unit_ms)
            .ok_or_else(|| anyhow!("sleep of {} x {}ms overflows", nap.value, nap.unit_ms))?;
        std::thread::sleep(Duration::from_millis(millis));
        Ok(nap.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identified {
    pub input: Value,
    pub pid: u32,
}

/// Returns its input tagged with the pid of the worker that ran it.
pub struct Identify;

impl TaskFn for Identify {
    const NAME: &'static str = "identify";
    type Input = Value;
    type Output = Identified;

    fn call(&self, input: Value) -> anyhow::Result<Identified> {
        Ok(Identified {
            input,
            pid: std::process::id(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitRequest {
    pub code: i32,
    /// Exit only if this file does not exist yet, creating it first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub once_marker: Option<PathBuf>,
}

/// Exits the worker process with `code`.
///
/// With `once_marker` set, only the first run exits; later runs return
/// `code` normally.
pub struct ExitProcess;

impl TaskFn for ExitProcess {
    const NAME: &'static str = "exit_process";
    type Input = ExitRequest;
    type Output = i32;

    fn call(&self, request: ExitRequest) -> anyhow::Result<i32> {
        if let Some(marker) = &request.once_marker {
            if marker.exists() {
                return Ok(request.code);
            }
            std::fs::write(marker, b"")
                .with_context(|| format!("creating {}", marker.display()))?;
        }
        std::process::exit(request.code)
    }
}

/// Registry with every demo function.
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(Factorial)
        .register(SleepEcho)
        .register(Identify)
        .register(ExitProcess);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_factorial_values() {
        let results: Vec<u64> = (0..=5).map(|n| Factorial.call(n).unwrap()).collect();
        assert_eq!(results, vec![1, 1, 2, 6, 24, 120]);
        assert_eq!(Factorial.call(20).unwrap(), 2_432_902_008_176_640_000);
    }

    #[test]
    fn test_factorial_overflow() {
        let err = Factorial.call(21).unwrap_err();
        assert_eq!(err.to_string(), "21! does not fit in 64 bits");
    }

    #[test]
    fn test_sleep_echo_returns_value() {
        let value = SleepEcho
            .call(Nap {
                value: 3,
                unit_ms: 1,
            })
            .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn test_identify_reports_own_pid() {
        let identified = Identify.call(json!({"k": 1})).unwrap();
        assert_eq!(identified.pid, std::process::id());
        assert_eq!(identified.input, json!({"k": 1}));
    }

    #[test]
    fn test_exit_process_returns_once_marker_exists() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("exited");
        std::fs::write(&marker, b"").unwrap();

        let request = ExitRequest {
            code: 7,
            once_marker: Some(marker),
        };
        assert_eq!(ExitProcess.call(request).unwrap(), 7);
    }

    #[test]
    fn test_registry_has_all_functions() {
        assert_eq!(
            registry().names(),
            vec!["exit_process", "factorial", "identify", "sleep_echo"]
        );
        assert_eq!(
            registry().invoke("sleep_echo", json!({"value": 2, "unit_ms": 0})),
            Ok(json!(2))
        );
    }
}
