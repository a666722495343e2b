//! Named task functions a worker can run.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A function the pool can map over inputs.
///
/// Task functions cross the process boundary by name: the manager sends
/// `NAME` plus a serialized argument, and the worker looks the function up in
/// its own [`Registry`]. Both sides must therefore register the same set.
pub trait TaskFn: Send + Sync + 'static {
    const NAME: &'static str;
    type Input: Serialize + DeserializeOwned + Send;
    type Output: Serialize + DeserializeOwned + Send;

    fn call(&self, input: Self::Input) -> anyhow::Result<Self::Output>;
}

type Handler = Box<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

#[derive(Default)]
pub struct Registry {
    handlers: HashMap<&'static str, Handler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task function under its `NAME`, replacing any previous one.
    pub fn register<F: TaskFn>(&mut self, function: F) -> &mut Self {
        let handler = move |argument: Value| -> Result<Value, String> {
            let input: F::Input = serde_json::from_value(argument)
                .map_err(|e| format!("invalid argument for '{}': {}", F::NAME, e))?;
            let output = function.call(input).map_err(|e| format!("{:#}", e))?;
            serde_json::to_value(output)
                .map_err(|e| format!("unserializable result from '{}': {}", F::NAME, e))
        };
        self.handlers.insert(F::NAME, Box::new(handler));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Run `name` on `argument`. Errors and panics both come back as `Err`.
    pub fn invoke(&self, name: &str, argument: Value) -> Result<Value, String> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| format!("unknown task function '{}'", name))?;

        catch_unwind(AssertUnwindSafe(|| handler(argument)))
            .unwrap_or_else(|payload| Err(format!("panicked: {}", panic_message(&*payload))))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
