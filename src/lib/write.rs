//! Durable single-key updates of env files.
//!
//! # Write Logic
//!
//! 1. Read and parse the target file, keeping values exactly as stored
//! 2. Insert or replace the key
//! 3. Copy the current file to `<path>.back`
//! 4. Rewrite the target with every pair sorted by key, one `KEY=VALUE` per line
//! 5. Optionally set the new pair in the environment store
//! 6. On success delete the backup; on any failure rename the backup over the target
//!
//! The backup never outlives a call. After an error the target holds either
//! the fully updated content or its original bytes.
//!
//! Nothing is fsynced, so the rollback covers errors the program observes and
//! not power loss during the rename.

use std::{
  ffi::OsString,
  fs::File,
  io::{self, BufWriter, Write},
  path::{Path, PathBuf},
};

#[cfg(feature = "tracing")]
use tracing::{debug, info, trace};

use crate::env::{EnvStore, ProcessEnv, SetError};
use crate::parse::{EnvMap, ParseError, ParseOptions, parse, parse_str};

const BACKUP_SUFFIX: &str = ".back";

/// Location of the transient backup for `path`.
pub fn backup_path<P: AsRef<Path>>(path: P) -> PathBuf {
  let mut backup = OsString::from(path.as_ref().as_os_str());
  backup.push(BACKUP_SUFFIX);
  PathBuf::from(backup)
}

/// Writes `key=value` into the file at `path`.
///
/// With `set_after_write` the pair is also set in the process environment
/// once the file has been written.
pub fn write<P: AsRef<Path>>(
  key: &str,
  value: &str,
  path: P,
  set_after_write: bool,
) -> Result<(), WriteError> {
  write_into(&mut ProcessEnv, key, value, path, set_after_write)
}

/// Same as [`write`], setting the pair in `store` instead of the process environment.
pub fn write_into<S, P>(
  store: &mut S,
  key: &str,
  value: &str,
  path: P,
  set_after_write: bool,
) -> Result<(), WriteError>
where
  S: EnvStore + ?Sized,
  P: AsRef<Path>,
{
  write_with(
    store,
    key,
    value,
    path.as_ref(),
    set_after_write,
    |target: &Path| File::create(target),
  )
}

fn write_with<S, W, F>(
  store: &mut S,
  key: &str,
  value: &str,
  path: &Path,
  set_after_write: bool,
  create: F,
) -> Result<(), WriteError>
where
  S: EnvStore + ?Sized,
  W: Write,
  F: FnOnce(&Path) -> io::Result<W>,
{
  #[cfg(feature = "tracing")]
  info!("Writing {} to {:?}", key, path);

  check_entry(key, value)?;

  let data = std::fs::read(path).map_err(|source| WriteError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let mut envs = parse(&data, ParseOptions::RAW).map_err(|source| WriteError::Parse {
    path: path.to_path_buf(),
    source,
  })?;
  envs.insert(key.to_string(), value.to_string());

  let backup = backup_path(path);

  #[cfg(feature = "tracing")]
  debug!("Backing up {:?} to {:?}", path, backup);

  if let Err(source) = std::fs::copy(path, &backup) {
    // Best effort: a partial copy must not linger.
    let _ = std::fs::remove_file(&backup);
    return Err(WriteError::Backup { path: backup, source });
  }

  let outcome = create(path)
    .and_then(|file| write_env_map(file, &envs))
    .map_err(|source| WriteError::Write {
      path: path.to_path_buf(),
      source,
    })
    .and_then(|()| {
      if set_after_write {
        store.set(key, value).map_err(WriteError::Set)
      } else {
        Ok(())
      }
    });

  match outcome {
    Ok(()) => {
      std::fs::remove_file(&backup).map_err(|source| WriteError::RemoveBackup {
        path: backup,
        source,
      })?;

      #[cfg(feature = "tracing")]
      debug!("Write completed, {} entries", envs.len());

      Ok(())
    }
    Err(cause) => {
      #[cfg(feature = "tracing")]
      debug!("Write failed ({}), restoring {:?}", cause, path);

      if let Err(source) = std::fs::rename(&backup, path) {
        return Err(WriteError::Restore {
          path: path.to_path_buf(),
          source,
          cause: Box::new(cause),
        });
      }
      Err(cause)
    }
  }
}

/// Rejects pairs whose `KEY=VALUE` line would not parse back to the same pair.
fn check_entry(key: &str, value: &str) -> Result<(), WriteError> {
  let invalid = || WriteError::InvalidEntry {
    key: key.to_string(),
    value: value.to_string(),
  };

  if key.contains(['\n', '\r']) || value.contains(['\n', '\r']) {
    return Err(invalid());
  }

  let line = format!("{}={}", key, value);
  let parsed = parse_str(&line, ParseOptions::RAW).map_err(|_| invalid())?;
  if parsed.len() == 1 && parsed.get(key).map(String::as_str) == Some(value) {
    Ok(())
  } else {
    Err(invalid())
  }
}

/// Serializes `envs` as `KEY=VALUE` lines in key order.
pub fn write_env_map<W: Write>(out: W, envs: &EnvMap) -> io::Result<()> {
  let mut out = BufWriter::new(out);
  for (key, value) in envs {
    #[cfg(feature = "tracing")]
    trace!("Writing {}", key);

    writeln!(out, "{}={}", key, value)?;
  }
  out.flush()
}

/// Errors that can occur while writing a key back to an env file.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
  /// The pair cannot be stored as one line that reads back unchanged
  #[error("Cannot store {key:?}={value:?} without changing its meaning")]
  InvalidEntry { key: String, value: String },
  /// Error reading the target file
  #[error("Failed to read {path:?}: {source}")]
  Read { path: PathBuf, source: io::Error },
  /// Error parsing the target file
  #[error("Failed to parse {path:?}: {source}")]
  Parse { path: PathBuf, source: ParseError },
  /// Error creating the backup; the target was not touched
  #[error("Failed to create backup {path:?}: {source}")]
  Backup { path: PathBuf, source: io::Error },
  /// Error rewriting the target; the original was restored
  #[error("Failed to write {path:?}: {source}")]
  Write { path: PathBuf, source: io::Error },
  /// Error setting the pair after writing; the original was restored
  #[error("Failed to set written variable: {0}")]
  Set(SetError),
  /// The backup could not be moved back after `cause`
  #[error("Failed to restore {path:?} after error ({cause}): {source}")]
  Restore {
    path: PathBuf,
    source: io::Error,
    cause: Box<WriteError>,
  },
  /// The write succeeded but the backup could not be deleted
  #[error("Failed to remove backup {path:?}: {source}")]
  RemoveBackup { path: PathBuf, source: io::Error },
}
