//! # Garbage collect module
//!
//! This module provides the command which removes secrets left behind by
//! deleted calculators

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::Args;

use crate::{
    cmd::Executor,
    svc::{
        cfg::Configuration,
        crd::calculator::{self, ReconcilerError},
        k8s::{client, store},
    },
};

// -----------------------------------------------------------------------------
// GarbageCollectError enum

#[derive(thiserror::Error, Debug)]
pub enum GarbageCollectError {
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to collect orphaned secrets, {0}")]
    Collect(ReconcilerError),
}

// -----------------------------------------------------------------------------
// GarbageCollect structure

#[derive(Args, Clone, Debug)]
pub struct GarbageCollect {
    /// Only print secrets which would be deleted
    #[clap(long = "dry-run")]
    pub dry_run: bool,
}

#[async_trait]
impl Executor for GarbageCollect {
    type Error = GarbageCollectError;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(_config)))]
    async fn execute(
        &self,
        kubeconfig: Option<PathBuf>,
        _config: Arc<Configuration>,
    ) -> Result<(), Self::Error> {
        let kube = client::try_new(kubeconfig)
            .await
            .map_err(GarbageCollectError::Client)?;

        let store = store::Kubernetes::from(kube);
        let collected = calculator::garbage_collect(&store, self.dry_run)
            .await
            .map_err(GarbageCollectError::Collect)?;

        for (namespace, name) in collected {
            if self.dry_run {
                println!("secret {namespace}/{name} would be deleted");
            } else {
                println!("secret {namespace}/{name} deleted");
            }
        }

        Ok(())
    }
}
