use clap::{Parser, Subcommand};
use env_file::{EnvStore, ProcessEnv, apply_into, get, load, must_get, read_merged, write};
use std::path::PathBuf;

const DEFAULT_ENV_FILENAME: &str = ".env";

#[derive(Parser)]
#[command(
  name = "env-file",
  about = "Load .env files and durably write keys back",
  version,
  author
)]
struct Cli {
  #[command(subcommand)]
  command: Command,

  /// Verbose output (-v for verbose, -vv for very verbose)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,
}

#[derive(Subcommand)]
enum Command {
  /// Load env files and print the resulting variables
  Show {
    /// Env files to load, in order (defaults to .env)
    #[arg(short, long = "file")]
    files: Vec<PathBuf>,
  },
  /// Load env files and print a single variable
  Get {
    key: String,

    /// Value printed when the variable is unset or empty
    #[arg(short, long, default_value = "")]
    default: String,

    /// Fail when the variable is unset or empty
    #[arg(short, long, conflicts_with = "default")]
    required: bool,

    /// Env files to load, in order (defaults to .env)
    #[arg(short, long = "file")]
    files: Vec<PathBuf>,
  },
  /// Write a variable back to an env file
  Write {
    key: String,
    value: String,

    /// Path to the env file
    #[arg(short, long, default_value = DEFAULT_ENV_FILENAME)]
    file: PathBuf,
  },
}

fn setup_tracing(verbose: u8) {
  use tracing_subscriber::fmt;
  use tracing_subscriber::prelude::*;

  let log_level = match verbose {
    1 => "debug",
    2 => "trace",
    _ => "info",
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(tracing_subscriber::EnvFilter::new(
      std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
    ))
    .init();
}

fn or_default(files: Vec<PathBuf>) -> Vec<PathBuf> {
  if files.is_empty() {
    vec![PathBuf::from(DEFAULT_ENV_FILENAME)]
  } else {
    files
  }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let cli = Cli::parse();

  setup_tracing(cli.verbose);

  match cli.command {
    Command::Show { files } => {
      let (envs, files_read) = read_merged(or_default(files))?;
      apply_into(&mut ProcessEnv, &envs, files_read)?;

      for key in envs.keys() {
        println!("{}={}", key, ProcessEnv.get(key).unwrap_or_default());
      }
    }
    Command::Get {
      key,
      default,
      required,
      files,
    } => {
      load(or_default(files))?;

      let value = if required {
        must_get(&key)?
      } else {
        get(&key, &default)
      };
      println!("{}", value);
    }
    Command::Write { key, value, file } => {
      if !file.exists() {
        std::fs::write(&file, "")?;
      }
      write(&key, &value, &file, false)?;
    }
  }

  Ok(())
}
