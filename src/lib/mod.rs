//! Environment file loading and durable write-back.
//!
//! This library reads `.env` style files into the process environment and
//! persists single-key updates back to those files without ever leaving a
//! half-written file behind.
//!
//! # Features
//!
//! - **Comment and quote aware parsing**: full-line and inline `#` comments,
//!   double-quoted values kept verbatim
//! - **Non-destructive loading**: variables already set are never overwritten
//! - **Durable writes**: sorted output, backup and rollback on failure
//! - **Injectable stores**: every operation runs against any [`env::EnvStore`]
//! - **Optional tracing**: Detailed logging when the `tracing` feature is enabled
//!
//! # Example
//!
//! ```rust,no_run
//! use env_file::{get, load, must_get, write};
//!
//! load([".env", ".env.local"]).unwrap();
//!
//! let db_name = get("DB_NAME", "db_name_default");
//! let secret = must_get("API_SECRET").unwrap();
//!
//! write("DB_PASSWORD", "db_password_new", ".env", true).unwrap();
//! ```

pub mod env;
pub mod load;
pub mod parse;
pub mod write;

pub use env::{EnvError, EnvStore, MemoryEnv, ProcessEnv, SetError, get, must_get, set};
pub use load::{LoadError, LoadReport, apply_into, load, load_into, read_merged};
pub use parse::{EnvMap, ParseError, ParseOptions, parse};
pub use write::{WriteError, backup_path, write, write_into};
