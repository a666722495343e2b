//! # procpool
//!
//! A fixed-size pool of worker processes that maps a function over inputs and
//! yields the results in input order.
//!
//! Task functions implement [`TaskFn`] and are registered by name in a
//! [`Registry`]. Worker processes are the host binary itself, re-executed in
//! worker mode, so the host calls [`enter_if_worker`] first thing in `main`:
//!
//! ```ignore
//! fn main() {
//!     procpool::enter_if_worker(&my_registry());
//!     // ... normal program, which may create `Pool`s ...
//! }
//! ```
//!
//! ## Modules
//!
//! - `channel` - Mutex-guarded hand-off channel between the manager and workers
//! - `config` - Pool configuration with TOML and environment overrides
//! - `pool` - The pool, its dispatcher and the ordered result stream
//! - `protocol` - Newline-delimited JSON messages exchanged with worker processes
//! - `subprocess` - Launching workers as processes or threads
//! - `worker` - Task registry, worker loop and the manager-side relay
//! - `demo` - Task functions used by the `procpool` binary
pub mod app;
pub mod channel;
pub mod cli;
pub mod config;
pub mod demo;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod subprocess;
pub mod worker;

pub use config::{FailurePolicy, PoolConfig};
pub use error::{PoolError, Result};
pub use pool::{MapStream, Pool, PoolStatus};
pub use subprocess::{Launcher, ProcessLauncher, ThreadLauncher};
pub use worker::{enter_if_worker, Registry, TaskFn};
