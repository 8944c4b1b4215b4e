// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Pull-based metrics endpoint publishing every metric source on
//! `GET /metrics`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use log::{debug, error, info, warn};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::compose::MetricSource;
use crate::errors::ServerError;

pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

static NOTFOUND: &[u8] = b"Not found";

type Body = BoxBody<Bytes, std::io::Error>;

struct Scraper {
    sources: Vec<Arc<dyn MetricSource>>,
    timeout: Duration,
}

impl Scraper {
    /// Collect every source concurrently. A source still running after the
    /// scrape timeout contributes its stale values instead.
    async fn gather(&self) -> Vec<MetricFamily> {
        let mut tasks = JoinSet::new();
        for source in &self.sources {
            let source = Arc::clone(source);
            let timeout = self.timeout;
            tasks.spawn(async move {
                let metrics = match tokio::time::timeout(timeout, source.collect()).await {
                    Ok(metrics) => metrics,
                    Err(_) => {
                        warn!(
                            "Collector {} did not finish within {timeout:?}, serving stale values",
                            source.name()
                        );
                        source.stale()
                    }
                };
                (source.name().to_string(), metrics)
            });
        }

        let registry = prometheus::Registry::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, metrics)) => {
                    for metric in metrics {
                        if let Err(e) = registry.register(metric) {
                            error!("Failed to register metrics of collector {name}: {e}");
                        }
                    }
                }
                Err(e) => error!("Collector task failed: {e}"),
            }
        }

        registry.gather()
    }

    async fn metrics(&self) -> Result<Response<Body>> {
        let families = self.gather().await;
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .map_err(|e| anyhow!("Failed to encode metrics: {}", e))?;

        Response::builder()
            .header(CONTENT_TYPE, encoder.format_type())
            .body(Full::new(Bytes::from(buf)).map_err(|e| match e {}).boxed())
            .map_err(|e| anyhow!("Failed to build response: {}", e))
    }
}

fn not_found() -> Result<Response<Body>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(NOTFOUND.into()).map_err(|e| match e {}).boxed())
        .map_err(|e| anyhow!("Failed to build not found response: {}", e))
}

fn internal_error() -> Response<Body> {
    let body = || {
        Full::new(Bytes::from(&b"Internal Server Error"[..]))
            .map_err(|e| match e {})
            .boxed()
    };
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(body())
        .unwrap_or_else(|_| Response::new(body()))
}

async fn handle_request(
    scraper: &Scraper,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Body>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => scraper.metrics().await,
        _ => {
            debug!(
                "{} Request to unknown endpoint: {}",
                req.method(),
                req.uri().path()
            );
            not_found()
        }
    }
}

async fn serve(
    listener: TcpListener,
    scraper: Arc<Scraper>,
    token: CancellationToken,
    errors: mpsc::Sender<ServerError>,
) {
    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                let (stream, peer) = match accept_result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Metrics server failed to accept connections: {e}");
                        let _ = errors.send(ServerError::Accept(e)).await;
                        break;
                    }
                };

                // Use an adapter to access something implementing `tokio::io` traits as if they
                // implement `hyper::rt` IO traits.
                let io = TokioIo::new(stream);
                let scraper = Arc::clone(&scraper);
                let connection = http1::Builder::new().serve_connection(
                    io,
                    service_fn(move |req| {
                        let scraper = Arc::clone(&scraper);
                        async move {
                            Ok::<_, anyhow::Error>(
                                handle_request(&scraper, req).await.unwrap_or_else(|e| {
                                    error!("Request handling failed: {e}");
                                    internal_error()
                                }),
                            )
                        }
                    }),
                );
                let connection = graceful.watch(connection);
                connections.spawn(async move {
                    if let Err(err) = connection.await {
                        debug!("Error serving connection from {peer}: {err}");
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = token.cancelled() => break,
        }
    }

    drop(listener);
    graceful.shutdown().await;
    while connections.join_next().await.is_some() {}
}

/// HTTP server publishing the metric sources it was built with.
pub struct MetricsServer {
    listen_address: String,
    scraper: Arc<Scraper>,
    token: CancellationToken,
    local_addr: Option<SocketAddr>,
    handle: Option<JoinHandle<()>>,
}

impl MetricsServer {
    pub fn new(
        listen_address: impl Into<String>,
        sources: Vec<Arc<dyn MetricSource>>,
        scrape_timeout: Duration,
    ) -> Self {
        Self {
            listen_address: listen_address.into(),
            scraper: Arc::new(Scraper {
                sources,
                timeout: scrape_timeout,
            }),
            token: CancellationToken::new(),
            local_addr: None,
            handle: None,
        }
    }

    /// Start listening. The returned channel receives at most one error,
    /// when the listener cannot bind or stops unexpectedly; it closes
    /// without a value after a clean shutdown.
    pub async fn start(&mut self) -> mpsc::Receiver<ServerError> {
        let (tx, rx) = mpsc::channel(1);

        let listener = match TcpListener::bind(&self.listen_address).await {
            Ok(listener) => listener,
            Err(source) => {
                let _ = tx.try_send(ServerError::Bind {
                    address: self.listen_address.clone(),
                    source,
                });
                return rx;
            }
        };

        self.local_addr = listener.local_addr().ok();
        info!(
            "Metrics server listening on {} ({} collectors)",
            self.listen_address,
            self.scraper.sources.len()
        );

        self.handle = Some(tokio::spawn(serve(
            listener,
            Arc::clone(&self.scraper),
            self.token.clone(),
            tx,
        )));
        rx
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop accepting connections and wait up to `deadline` for in-flight
    /// scrapes; connections still open after that are closed.
    pub async fn shutdown(&mut self, deadline: Duration) -> Result<(), ServerError> {
        self.token.cancel();
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        match tokio::time::timeout(deadline, &mut handle).await {
            Ok(_) => {
                info!("Metrics server stopped gracefully");
                Ok(())
            }
            Err(_) => {
                warn!("Metrics server shutdown timed out after {deadline:?}, closing connections");
                handle.abort();
                Err(ServerError::ShutdownTimeout(deadline))
            }
        }
    }
}
