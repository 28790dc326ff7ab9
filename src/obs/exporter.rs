//! Prometheus exposition for relay metrics.
//!
//! The recorder is installed once per process. The HTTP side is a single-route `axum` router
//! that renders the recorder on `GET /metrics`; it needs no broker connection and stops when
//! the shared cancellation token fires.

// std
use std::net::SocketAddr;
// crates.io
use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	obs::{CALLBACK_DURATION_SECONDS, describe_metrics},
};

/// Prometheus text exposition content type.
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
/// Histogram buckets, in seconds, for `callback_duration_seconds`.
pub const DURATION_BUCKETS: [f64; 14] =
	[0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0];

/// Builds the Prometheus recorder with relay bucket settings.
pub fn prometheus_builder() -> Result<PrometheusBuilder, ConfigError> {
	PrometheusBuilder::new()
		.set_buckets_for_metric(
			Matcher::Full(CALLBACK_DURATION_SECONDS.to_owned()),
			&DURATION_BUCKETS,
		)
		.map_err(ConfigError::metrics_exporter)
}

/// Installs the process-wide recorder and registers metric descriptions.
pub fn install_recorder() -> Result<PrometheusHandle, ConfigError> {
	let handle = prometheus_builder()?.install_recorder().map_err(ConfigError::metrics_exporter)?;

	describe_metrics();

	Ok(handle)
}

/// Router exposing `GET /metrics`.
pub fn router(handle: PrometheusHandle) -> Router {
	Router::new().route("/metrics", get(render)).with_state(handle)
}

/// Binds the metrics listener.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ConfigError> {
	TcpListener::bind(addr)
		.await
		.map_err(|source| ConfigError::Bind { addr: addr.to_string(), source })
}

/// Serves the metrics router until `shutdown` is cancelled.
pub async fn serve(
	listener: TcpListener,
	handle: PrometheusHandle,
	shutdown: CancellationToken,
) -> Result<(), ConfigError> {
	if let Ok(addr) = listener.local_addr() {
		tracing::info!(%addr, "metrics server listening");
	}

	axum::serve(listener, router(handle))
		.with_graceful_shutdown(shutdown.cancelled_owned())
		.await
		.map_err(|source| ConfigError::Serve { source })?;

	tracing::info!("metrics server stopped");

	Ok(())
}

async fn render(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
	([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], handle.render())
}
