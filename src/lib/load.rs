//! Loading env files into an environment store.
//!
//! # Load Logic
//!
//! 1. Every path is read in order; a missing or unreadable file aborts the load
//! 2. Each file is parsed with quote stripping enabled
//! 3. Files are merged, later files winning on key collisions
//! 4. Each merged key is applied unless the store already holds a non-empty value
//!
//! Keys that the store refuses are collected and reported together once every
//! key has been attempted.

use std::{
  fmt,
  path::{Path, PathBuf},
};

#[cfg(feature = "tracing")]
use tracing::{debug, info, trace};

use crate::env::{EnvStore, ProcessEnv, SetError};
use crate::parse::{EnvMap, ParseError, ParseOptions, parse};

/// Summary of a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadReport {
  pub files_read: usize,
  pub loaded: usize,
  pub skipped_existing: usize,
}

/// Loads `paths` into the process environment.
pub fn load<I, P>(paths: I) -> Result<LoadReport, LoadError>
where
  I: IntoIterator<Item = P>,
  P: AsRef<Path>,
{
  load_into(&mut ProcessEnv, paths)
}

/// Loads `paths` into `store`.
///
/// Values already present and non-empty in `store` are never replaced.
pub fn load_into<S, I, P>(store: &mut S, paths: I) -> Result<LoadReport, LoadError>
where
  S: EnvStore + ?Sized,
  I: IntoIterator<Item = P>,
  P: AsRef<Path>,
{
  #[cfg(feature = "tracing")]
  info!("Loading env files");

  let (envs, files_read) = read_merged(paths)?;
  apply_into(store, &envs, files_read)
}

/// Applies an already merged map to `store`, keeping non-empty existing values.
///
/// `files_read` is carried into the returned report.
pub fn apply_into<S>(
  store: &mut S,
  envs: &EnvMap,
  files_read: usize,
) -> Result<LoadReport, LoadError>
where
  S: EnvStore + ?Sized,
{
  let mut report = LoadReport {
    files_read,
    ..LoadReport::default()
  };
  let mut failures = Vec::new();

  for (key, value) in envs {
    if store.get_non_empty(key).is_some() {
      #[cfg(feature = "tracing")]
      trace!("Skipping {}: already set", key);

      report.skipped_existing += 1;
      continue;
    }

    match store.set(key, value) {
      Ok(()) => report.loaded += 1,
      Err(source) => {
        #[cfg(feature = "tracing")]
        debug!("Failed to set {}: {}", key, source);

        failures.push(SetFailure {
          key: key.clone(),
          source,
        });
      }
    }
  }

  if !failures.is_empty() {
    return Err(LoadError::SetFailed(SetFailures(failures)));
  }

  #[cfg(feature = "tracing")]
  debug!(?report, "Load completed");

  Ok(report)
}

/// Reads and merges `paths` without touching any store.
pub fn read_merged<I, P>(paths: I) -> Result<(EnvMap, usize), LoadError>
where
  I: IntoIterator<Item = P>,
  P: AsRef<Path>,
{
  let mut merged = EnvMap::new();
  let mut files_read = 0;

  for path in paths {
    let path = path.as_ref();

    #[cfg(feature = "tracing")]
    debug!("Reading env file {:?}", path);

    let data = std::fs::read(path).map_err(|source| LoadError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let envs = parse(&data, ParseOptions::LOAD).map_err(|source| LoadError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    files_read += 1;
    merged.extend(envs);
  }

  Ok((merged, files_read))
}

/// A key the store refused to set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetFailure {
  pub key: String,
  pub source: SetError,
}

/// Every key that failed during one load, in key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetFailures(pub Vec<SetFailure>);

impl SetFailures {
  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(|failure| failure.key.as_str())
  }
}

impl fmt::Display for SetFailures {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (idx, key) in self.keys().enumerate() {
      if idx > 0 {
        write!(f, " ")?;
      }
      write!(f, "{}", key)?;
    }
    Ok(())
  }
}

/// Errors that can occur while loading env files.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
  /// The file is missing or unreadable
  #[error("Failed to read {path:?}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  /// The file contains a malformed line or invalid UTF-8
  #[error("Failed to parse {path:?}: {source}")]
  Parse { path: PathBuf, source: ParseError },
  /// One or more keys could not be set
  #[error("Failed to set the following environment variables: {0}")]
  SetFailed(SetFailures),
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::env::MemoryEnv;
  use tempfile::TempDir;

  fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
  }

  #[test]
  fn test_load_into_memory() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, ".env", "DB_NAME=db_name\nSECRET=\"a#b\" # note\n");

    let mut env = MemoryEnv::new();
    let report = load_into(&mut env, [&path]).unwrap();

    assert_eq!(
      report,
      LoadReport {
        files_read: 1,
        loaded: 2,
        skipped_existing: 0,
      }
    );
    assert_eq!(env.vars()["DB_NAME"], "db_name");
    assert_eq!(env.vars()["SECRET"], "a#b");
  }

  #[test]
  fn test_later_files_win() {
    let dir = TempDir::new().unwrap();
    let first = write_file(&dir, ".env.base", "A=base\nB=base\n");
    let second = write_file(&dir, ".env.local", "B=local\nC=local\n");

    let mut env = MemoryEnv::new();
    load_into(&mut env, [first, second]).unwrap();

    assert_eq!(env.vars()["A"], "base");
    assert_eq!(env.vars()["B"], "local");
    assert_eq!(env.vars()["C"], "local");
  }

  #[test]
  fn test_existing_values_are_kept() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, ".env", "A=from_file\nB=from_file\n");

    let mut env: MemoryEnv = [("A", "existing"), ("B", "")].into_iter().collect();
    let report = load_into(&mut env, [path]).unwrap();

    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped_existing, 1);
    assert_eq!(env.vars()["A"], "existing");
    assert_eq!(env.vars()["B"], "from_file");
  }

  #[test]
  fn test_missing_file_aborts() {
    let dir = TempDir::new().unwrap();
    let present = write_file(&dir, ".env", "A=1\n");
    let missing = dir.path().join("missing.env");

    let mut env = MemoryEnv::new();
    let err = load_into(&mut env, [present, missing.clone()]).unwrap_err();

    match err {
      LoadError::Read { path, .. } => assert_eq!(path, missing),
      other => panic!("Expected Read error, got {other:?}"),
    }
    assert!(env.vars().is_empty());
  }

  #[test]
  fn test_parse_error_names_path() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "broken.env", "A=1\nnot a pair\n");

    let err = load_into(&mut MemoryEnv::new(), [&path]).unwrap_err();

    match err {
      LoadError::Parse {
        path: err_path,
        source,
      } => {
        assert_eq!(err_path, path);
        assert!(matches!(source, ParseError::MalformedLine { line: 2, .. }));
      }
      other => panic!("Expected Parse error, got {other:?}"),
    }
  }

  #[test]
  fn test_set_failures_are_aggregated() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, ".env", "BAD\0ONE=1\nGOOD=2\nNUL_VALUE=a\0b\n");

    let mut env = MemoryEnv::new();
    let err = load_into(&mut env, [path]).unwrap_err();

    let LoadError::SetFailed(failures) = err else {
      panic!("Expected SetFailed error");
    };
    assert_eq!(failures.keys().collect::<Vec<_>>(), ["BAD\0ONE", "NUL_VALUE"]);
    assert_eq!(
      failures.0[1].source,
      SetError::InvalidValue("NUL_VALUE".to_string())
    );
    assert_eq!(
      LoadError::SetFailed(failures).to_string(),
      "Failed to set the following environment variables: BAD\0ONE NUL_VALUE"
    );
    assert_eq!(env.vars()["GOOD"], "2");
  }

  #[test]
  fn test_apply_into_merged_map() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, ".env", "A=from_file\nB=2\n");

    let (envs, files_read) = read_merged([&path]).unwrap();
    let mut env: MemoryEnv = [("A", "existing")].into_iter().collect();
    let report = apply_into(&mut env, &envs, files_read).unwrap();

    assert_eq!(
      report,
      LoadReport {
        files_read: 1,
        loaded: 1,
        skipped_existing: 1,
      }
    );
    assert_eq!(envs.keys().collect::<Vec<_>>(), ["A", "B"]);
    assert_eq!(env.vars()["A"], "existing");
    assert_eq!(env.vars()["B"], "2");
  }

  #[test]
  fn test_no_paths_is_a_no_op() {
    let mut env = MemoryEnv::new();
    let report = load_into(&mut env, Vec::<PathBuf>::new()).unwrap();

    assert_eq!(report, LoadReport::default());
  }
}
