//! # Metrics module
//!
//! This module encodes the registered prometheus metrics

use hyper::{
    header::{self, HeaderValue, InvalidHeaderValue},
    Body, Request, Response, StatusCode,
};
use prometheus::{gather, Encoder, TextEncoder};

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize metrics, {0}")]
    PrometheusSerialize(prometheus::Error),
    #[error("failed to parse header value given by prometheus, {0}")]
    PrometheusInvalidHeader(InvalidHeaderValue),
}

// -----------------------------------------------------------------------------
// Helper methods

#[cfg_attr(feature = "trace", tracing::instrument)]
/// returns in the [`Response`] object the metrics gathered from the default
/// registry using the prometheus text format
pub async fn handler(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let encoder = TextEncoder::new();
    let mut buf = vec![];

    encoder
        .encode(&gather(), &mut buf)
        .map_err(Error::PrometheusSerialize)?;

    let mut res = Response::new(Body::from(buf));

    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(encoder.format_type()).map_err(Error::PrometheusInvalidHeader)?,
    );
    *res.status_mut() = StatusCode::OK;

    Ok(res)
}
