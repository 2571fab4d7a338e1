//! # Command module
//!
//! This module provide command line interface structures and helpers
use std::{io, path::PathBuf, process::abort, sync::Arc};

use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info};

use crate::{
    cmd::{crd::CustomResourceDefinitionError, gc::GarbageCollectError},
    svc::{
        cfg::Configuration,
        crd::calculator,
        http,
        k8s::{client, Context, Watcher},
    },
};

pub mod crd;
pub mod gc;

// -----------------------------------------------------------------------------
// Executor trait

#[async_trait]
pub trait Executor {
    type Error;

    async fn execute(
        &self,
        kubeconfig: Option<PathBuf>,
        config: Arc<Configuration>,
    ) -> Result<(), Self::Error>;
}

// -----------------------------------------------------------------------------
// CommandError enum

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("failed to execute command '{0}', {1}")]
    Execution(String, Arc<CommandError>),
    #[error("failed to execute command, {0}")]
    CustomResourceDefinition(CustomResourceDefinitionError),
    #[error("failed to execute command, {0}")]
    GarbageCollect(GarbageCollectError),
}

// -----------------------------------------------------------------------------
// Command enum

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Interact with custom resource definition
    #[clap(name = "custom-resource-definition", aliases = &["crd"], subcommand)]
    CustomResourceDefinition(crd::CustomResourceDefinition),
    /// Delete secrets whose calculator no longer exists
    #[clap(name = "garbage-collect", aliases = &["gc"])]
    GarbageCollect(gc::GarbageCollect),
}

#[async_trait]
impl Executor for Command {
    type Error = CommandError;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
    async fn execute(
        &self,
        kubeconfig: Option<PathBuf>,
        config: Arc<Configuration>,
    ) -> Result<(), Self::Error> {
        match self {
            Self::CustomResourceDefinition(crd) => crd
                .execute(kubeconfig, config)
                .await
                .map_err(CommandError::CustomResourceDefinition)
                .map_err(|err| {
                    CommandError::Execution("custom-resource-definition".into(), Arc::new(err))
                }),
            Self::GarbageCollect(gc) => gc
                .execute(kubeconfig, config)
                .await
                .map_err(CommandError::GarbageCollect)
                .map_err(|err| CommandError::Execution("garbage-collect".into(), Arc::new(err))),
        }
    }
}

// -----------------------------------------------------------------------------
// Args struct

#[derive(Parser, Clone, Debug)]
#[clap(version, about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Args {
    /// Increase log verbosity
    #[clap(short = 'v', global = true, action = ArgAction::Count)]
    pub verbosity: u8,
    /// Specify location of kubeconfig
    #[clap(short = 'k', long = "kubeconfig", global = true)]
    pub kubeconfig: Option<PathBuf>,
    /// Specify location of configuration
    #[clap(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Check if configuration is healthy
    #[clap(short = 't', long = "check", global = true)]
    pub check: bool,
    #[clap(subcommand)]
    pub command: Option<Command>,
}

// -----------------------------------------------------------------------------
// DaemonError enum

#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error("failed to handle termination signal, {0}")]
    SigTerm(io::Error),
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
}

// -----------------------------------------------------------------------------
// daemon function

#[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
pub async fn daemon(
    kubeconfig: Option<PathBuf>,
    config: Arc<Configuration>,
) -> Result<(), DaemonError> {
    // -------------------------------------------------------------------------
    // Create a new kubernetes client from path if defined, or via the
    // environment or defaults locations
    let kube = client::try_new(kubeconfig)
        .await
        .map_err(DaemonError::Client)?;

    // -------------------------------------------------------------------------
    // Create context to give to each reconciler
    let context = Arc::new(Context::new(kube, config.to_owned()));

    // -------------------------------------------------------------------------
    // Create reconcilers and the telemetry server
    let addr = config.operator.listen;
    let handles = vec![
        tokio::spawn(async move {
            let reconciler = calculator::Reconciler::default();

            info!("Start to listen for events of calculator custom resource");
            if let Err(err) = reconciler.watch(context).await {
                error!(
                    error = err.to_string(),
                    "Could not reconcile calculator custom resource"
                );
            }

            abort();
        }),
        tokio::spawn(async move {
            if let Err(err) = http::serve(addr).await {
                error!(error = err.to_string(), "Could not serve telemetry endpoints");
            }

            abort();
        }),
    ];

    // -------------------------------------------------------------------------
    // Wait for termination signal
    tokio::signal::ctrl_c()
        .await
        .map_err(DaemonError::SigTerm)?;

    // -------------------------------------------------------------------------
    // Cancel reconcilers and server
    handles.iter().for_each(|handle| handle.abort());

    for handle in handles {
        if let Err(err) = handle.await {
            if !err.is_cancelled() {
                error!(
                    error = err.to_string(),
                    "Could not wait for the task to complete"
                );
            }
        }
    }

    Ok(())
}
