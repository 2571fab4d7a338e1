//! # Logging module
//!
//! This module provides logging facilities and helpers

use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, registry, Layer};

use crate::svc::cfg::Configuration;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to set global default subscriber, {0}")]
    GlobalDefaultSubscriber(tracing::subscriber::SetGlobalDefaultError),
    #[cfg(feature = "trace")]
    #[error("failed to install jaeger pipeline, {0}")]
    Jaeger(opentelemetry::trace::TraceError),
}

// -----------------------------------------------------------------------------
// helpers

pub const fn level(verbosity: usize) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn layer<S>() -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_thread_names(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true)
}

#[cfg(not(feature = "trace"))]
pub fn initialize(_config: &Configuration, verbosity: usize) -> Result<(), Error> {
    let subscriber = registry()
        .with(LevelFilter::from_level(level(verbosity)))
        .with(layer());

    tracing::subscriber::set_global_default(subscriber).map_err(Error::GlobalDefaultSubscriber)
}

#[cfg(feature = "trace")]
pub fn initialize(config: &Configuration, verbosity: usize) -> Result<(), Error> {
    let subscriber = registry()
        .with(LevelFilter::from_level(level(verbosity)))
        .with(layer());

    let jaeger = match &config.jaeger {
        Some(jaeger) => jaeger,
        None => {
            return tracing::subscriber::set_global_default(subscriber)
                .map_err(Error::GlobalDefaultSubscriber);
        }
    };

    let tracer = opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_endpoint(jaeger.endpoint.as_str())
        .install_batch(opentelemetry::runtime::Tokio)
        .map_err(Error::Jaeger)?;

    tracing::subscriber::set_global_default(
        subscriber.with(tracing_opentelemetry::layer().with_tracer(tracer)),
    )
    .map_err(Error::GlobalDefaultSubscriber)
}

/// flush pending spans, if any
pub fn shutdown() {
    #[cfg(feature = "trace")]
    opentelemetry::global::shutdown_tracer_provider();
}
