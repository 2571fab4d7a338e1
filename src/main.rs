//! # Calc operator
//!
//! A kubernetes operator that computes the sum of calculator custom resources,
//! writes it in their status and exposes it through a secret

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use crate::{
    cmd::{daemon, Args, Executor},
    svc::cfg::Configuration,
};

pub mod cmd;
pub mod logging;
pub mod svc;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to interact with command line interface, {0}")]
    Command(cmd::CommandError),
    #[error("failed to execute daemon, {0}")]
    Daemon(cmd::DaemonError),
    #[error("failed to initialize logging system, {0}")]
    Logging(logging::Error),
    #[error("failed to load configuration, {0}")]
    Configuration(svc::cfg::ConfigurationError),
}

impl From<logging::Error> for Error {
    fn from(err: logging::Error) -> Self {
        Self::Logging(err)
    }
}

impl From<svc::cfg::ConfigurationError> for Error {
    fn from(err: svc::cfg::ConfigurationError) -> Self {
        Self::Configuration(err)
    }
}

// -----------------------------------------------------------------------------
// main entrypoint

#[tokio::main]
pub(crate) async fn main() -> Result<(), Error> {
    let args = Args::parse();
    let config = Arc::new(match &args.config {
        Some(path) => Configuration::try_from(path.to_owned())?,
        None => Configuration::try_default()?,
    });

    logging::initialize(&config, args.verbosity as usize)?;
    if args.check {
        println!("{} configuration is healthy!", env!("CARGO_PKG_NAME"));
        return Ok(());
    }

    let result = match &args.command {
        Some(cmd) => cmd
            .execute(args.kubeconfig.to_owned(), config)
            .await
            .map_err(Error::Command),
        None => daemon(args.kubeconfig.to_owned(), config)
            .await
            .map_err(Error::Daemon),
    };

    logging::shutdown();
    if let Err(err) = result {
        error!(
            error = err.to_string(),
            "could not execute {} properly",
            env!("CARGO_PKG_NAME"),
        );

        return Err(err);
    }

    info!("{} halted!", env!("CARGO_PKG_NAME"));
    Ok(())
}
