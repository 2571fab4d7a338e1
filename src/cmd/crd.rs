//! # Custom resource definition module
//!
//! This module provides custom resource module command line interface function
//! implementation

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::Subcommand;
use kube::CustomResourceExt;

use crate::{
    cmd::Executor,
    svc::{cfg::Configuration, crd::calculator::Calculator},
};

// -----------------------------------------------------------------------------
// CustomResourceDefinitionError enum

#[derive(thiserror::Error, Debug)]
pub enum CustomResourceDefinitionError {
    #[error("failed to serialize custom resource definition, {0}")]
    Serialize(serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// CustomResourceDefinition enum

#[derive(Subcommand, Clone, Debug)]
pub enum CustomResourceDefinition {
    /// View custom resource definition
    #[clap(name = "view", aliases = &["v"])]
    View,
}

#[async_trait]
impl Executor for CustomResourceDefinition {
    type Error = CustomResourceDefinitionError;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(_config)))]
    async fn execute(
        &self,
        _kubeconfig: Option<PathBuf>,
        _config: Arc<Configuration>,
    ) -> Result<(), Self::Error> {
        match self {
            Self::View => {
                print!("{}", view()?);
                Ok(())
            }
        }
    }
}

// -----------------------------------------------------------------------------
// view function

/// returns the custom resource definitions managed by the operator as yaml
pub fn view() -> Result<String, CustomResourceDefinitionError> {
    serde_yaml::to_string(&Calculator::crd()).map_err(CustomResourceDefinitionError::Serialize)
}
