//! # Telemetry module
//!
//! This module expose health and metrics endpoints of the operator through
//! structures, enums and helpers

use std::{collections::BTreeMap, time::Instant};

use hyper::{
    header::{self, HeaderValue},
    Body, Method, Request, Response, StatusCode,
};
#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{opts, register_counter_vec, CounterVec};
use tracing::info;

#[cfg(feature = "metrics")]
pub mod metrics;

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static SERVER_REQUEST: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubernetes_operator_server_request",
            "number of request handled by the server",
        ),
        &["method", "path", "status"]
    )
    .expect("metrics 'kubernetes_operator_server_request' to not be already registered")
});

#[cfg(feature = "metrics")]
static SERVER_REQUEST_DURATION: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubernetes_operator_server_request_duration",
            "duration of request handled by the server",
        ),
        &["method", "path", "status", "unit"]
    )
    .expect("metrics 'kubernetes_operator_server_request_duration' to not be already registered")
});

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[cfg(feature = "metrics")]
    #[error("{0}")]
    Metrics(metrics::Error),
    #[error("failed to serialize payload, {0}")]
    Serialize(serde_json::Error),
}

// -----------------------------------------------------------------------------
// Helper methods

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn router(req: Request<Body>) -> Result<Response<Body>, Error> {
    let begin = Instant::now();

    let result = match (req.method(), req.uri().path()) {
        (&Method::GET, "/healthz") | (&Method::GET, "/livez") | (&Method::GET, "/readyz") => {
            healthz(&req).await
        }
        #[cfg(feature = "metrics")]
        (&Method::GET, "/metrics") => metrics::handler(&req).await.map_err(Error::Metrics),
        _ => not_found(&req).await,
    };

    // -------------------------------------------------------------------------
    // Render errors as json payload
    let res = match result {
        Ok(res) => res,
        Err(err) => {
            let map = BTreeMap::from([("error".to_string(), err.to_string())]);
            let mut res = Response::default();

            res.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );

            *res.status_mut() = StatusCode::IM_A_TEAPOT;
            *res.body_mut() =
                Body::from(serde_json::to_string_pretty(&map).map_err(Error::Serialize)?);
            res
        }
    };

    let duration = begin.elapsed().as_micros();
    let host = req
        .uri()
        .host()
        .map(ToString::to_string)
        .or_else(|| {
            req.headers()
                .get(header::HOST)
                .map(|header| String::from_utf8_lossy(header.as_bytes()).to_string())
        })
        .unwrap_or_else(|| String::from("<none>"));

    info!(
        method = req.method().as_str(),
        host = host,
        path = req.uri().path(),
        status = res.status().as_u16(),
        duration = duration as u64,
        "Receive request"
    );

    #[cfg(feature = "metrics")]
    {
        let status = res.status().as_u16().to_string();

        SERVER_REQUEST
            .with_label_values(&[req.method().as_str(), req.uri().path(), &status])
            .inc();

        SERVER_REQUEST_DURATION
            .with_label_values(&[req.method().as_str(), req.uri().path(), &status, "us"])
            .inc_by(duration as f64);
    }

    Ok(res)
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn healthz(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let mut res = Response::default();

    *res.status_mut() = StatusCode::NO_CONTENT;

    Ok(res)
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn not_found(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let mut res = Response::default();

    *res.status_mut() = StatusCode::NOT_FOUND;

    Ok(res)
}
