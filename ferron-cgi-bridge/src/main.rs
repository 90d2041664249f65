mod backend;
mod bridge;
mod config;
mod copy_move;
mod environment;
mod error;
mod logging;
mod request;
mod response;
mod rewriter;

use std::path::PathBuf;
use std::str::FromStr;

use clap::error::ErrorKind;
use clap::{crate_name, crate_version, Arg, ArgAction, ArgMatches, Command};
use human_panic::{setup_panic, Metadata};
use mimalloc::MiMalloc;
use tokio::io::{AsyncWriteExt, BufReader};

use crate::backend::CgiBackend;
use crate::config::{BridgeConfig, ConfigError, ValidatedConfig, BACKEND_ENV, PROJECT_ROOT_ENV};
use crate::logging::ErrorLogger;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Parses the command-line arguments
fn parse_arguments() -> Result<ArgMatches, clap::Error> {
  Command::new(crate_name!())
    .version(crate_version!())
    .about("Serves a single HTTP/1.0 request from the standard input through a CGI program")
    .arg(
      Arg::new("backend")
        .long("backend")
        .short('b')
        .help("The path to the CGI program serving the request")
        .env(BACKEND_ENV)
        .action(ArgAction::Set)
        .value_parser(PathBuf::from_str),
    )
    .arg(
      Arg::new("project-root")
        .long("project-root")
        .short('r')
        .help("The path to the project root directory passed to the CGI program")
        .env(PROJECT_ROOT_ENV)
        .action(ArgAction::Set)
        .value_parser(PathBuf::from_str),
    )
    .try_get_matches()
}

/// Obtains the configuration and checks its preconditions
fn obtain_config() -> Result<ValidatedConfig, ConfigError> {
  let args = match parse_arguments() {
    Ok(args) => args,
    Err(err) => match err.kind() {
      ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
      _ => {
        let message = err.to_string();
        return Err(ConfigError::Arguments(
          message.lines().next().unwrap_or_default().to_string(),
        ));
      }
    },
  };

  BridgeConfig::new(
    args.get_one::<PathBuf>("backend").cloned(),
    args.get_one::<PathBuf>("project-root").cloned(),
  )
  .validate()
}

/// The main entry point of the application
fn main() {
  // Set the panic handler
  setup_panic!(Metadata::new("Ferron CGI bridge", env!("CARGO_PKG_VERSION"))
    .homepage("https://ferron.sh")
    .support("- Send an email message to hello@ferron.sh"));

  // The configuration is checked before the request is read
  let config = obtain_config();

  let runtime = match tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
  {
    Ok(runtime) => runtime,
    Err(err) => {
      // The process still exits with code 0
      eprintln!("Cannot create the async runtime: {err}");
      return;
    }
  };

  runtime.block_on(async move {
    let error_logger = ErrorLogger::stderr();
    let input = BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();

    let backend_error_logger = error_logger.clone();
    let make_backend = move |config: &ValidatedConfig| {
      CgiBackend::new(config.backend().to_path_buf(), backend_error_logger)
    };

    if let Err(err) = bridge::serve(config, make_backend, input, &mut output, &error_logger).await {
      error_logger
        .log(&format!("Cannot send the response: {err}"))
        .await;
    }
    output.flush().await.unwrap_or_default();
  });

  // Reading the standard input may still block a thread, so the runtime isn't waited for
  runtime.shutdown_background();
}
