//! Environment stores and the accessor API.
//!
//! The process environment is global mutable state. Every operation in this
//! crate is written against the [`EnvStore`] capability so it can run against
//! [`ProcessEnv`] in production and [`MemoryEnv`] in tests.
//!
//! None of these types lock anything. Callers that touch the process
//! environment from several threads must serialize access themselves, for
//! example by loading configuration before spawning workers.

use std::collections::BTreeMap;

#[cfg(feature = "tracing")]
use tracing::trace;

/// Read and write access to a set of environment variables.
pub trait EnvStore {
  /// Returns the value for `key`, or `None` when it is not set.
  fn get(&self, key: &str) -> Option<String>;

  /// Sets `key` to `value`, replacing any existing value.
  fn set(&mut self, key: &str, value: &str) -> Result<(), SetError>;

  /// Returns the value for `key` only when it is set and non-empty.
  fn get_non_empty(&self, key: &str) -> Option<String> {
    self.get(key).filter(|value| !value.is_empty())
  }
}

/// The environment of the running process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvStore for ProcessEnv {
  fn get(&self, key: &str) -> Option<String> {
    validate_key(key).ok()?;
    std::env::var_os(key).map(|value| value.to_string_lossy().into_owned())
  }

  fn set(&mut self, key: &str, value: &str) -> Result<(), SetError> {
    validate(key, value)?;

    #[cfg(feature = "tracing")]
    trace!("Setting process variable {}", key);

    // SAFETY: callers serialize environment access; see the module docs.
    unsafe { std::env::set_var(key, value) };
    Ok(())
  }
}

/// An isolated in-memory environment.
///
/// Applies the same key and value rules as [`ProcessEnv`], so a write that
/// would be rejected by the operating system is rejected here too.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryEnv {
  vars: BTreeMap<String, String>,
}

impl MemoryEnv {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn vars(&self) -> &BTreeMap<String, String> {
    &self.vars
  }

  pub fn into_vars(self) -> BTreeMap<String, String> {
    self.vars
  }
}

impl From<BTreeMap<String, String>> for MemoryEnv {
  fn from(vars: BTreeMap<String, String>) -> Self {
    Self { vars }
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemoryEnv {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self {
      vars: iter
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect(),
    }
  }
}

impl EnvStore for MemoryEnv {
  fn get(&self, key: &str) -> Option<String> {
    self.vars.get(key).cloned()
  }

  fn set(&mut self, key: &str, value: &str) -> Result<(), SetError> {
    validate(key, value)?;
    self.vars.insert(key.to_string(), value.to_string());
    Ok(())
  }
}

fn validate_key(key: &str) -> Result<(), SetError> {
  if key.is_empty() {
    Err(SetError::EmptyKey)
  } else if key.contains(['=', '\0']) {
    Err(SetError::InvalidKey(key.to_string()))
  } else {
    Ok(())
  }
}

fn validate(key: &str, value: &str) -> Result<(), SetError> {
  validate_key(key)?;
  if value.contains('\0') {
    return Err(SetError::InvalidValue(key.to_string()));
  }
  Ok(())
}

/// Returns the value of `key` in `store`, or `default` when unset or empty.
pub fn get_from<S: EnvStore + ?Sized>(store: &S, key: &str, default: &str) -> String {
  store
    .get_non_empty(key)
    .unwrap_or_else(|| default.to_string())
}

/// Returns the value of `key` in `store`, failing when unset or empty.
pub fn must_get_from<S: EnvStore + ?Sized>(store: &S, key: &str) -> Result<String, EnvError> {
  store
    .get_non_empty(key)
    .ok_or_else(|| EnvError::NotSet(key.to_string()))
}

/// Sets `key` in `store`, surfacing the store's error unchanged.
pub fn set_in<S: EnvStore + ?Sized>(store: &mut S, key: &str, value: &str) -> Result<(), SetError> {
  store.set(key, value)
}

/// Process environment value of `key`, or `default` when unset or empty.
pub fn get(key: &str, default: &str) -> String {
  get_from(&ProcessEnv, key, default)
}

/// Process environment value of `key`; [`EnvError::NotSet`] when unset or empty.
pub fn must_get(key: &str) -> Result<String, EnvError> {
  must_get_from(&ProcessEnv, key)
}

/// Sets `key` in the process environment.
pub fn set(key: &str, value: &str) -> Result<(), SetError> {
  set_in(&mut ProcessEnv, key, value)
}

/// Reasons a store refuses to set a variable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetError {
  /// The key is the empty string
  #[error("Environment variable name is empty")]
  EmptyKey,
  /// The key contains `=` or a NUL byte
  #[error("Invalid environment variable name: {0:?}")]
  InvalidKey(String),
  /// The value for the named key contains a NUL byte
  #[error("Invalid value for environment variable {0}")]
  InvalidValue(String),
}

/// Errors from the read accessors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvError {
  /// The variable is absent or empty
  #[error("Environment variable not set: {0}")]
  NotSet(String),
}
