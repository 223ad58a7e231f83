//! Metrics and health endpoint
//!
//! Serves `/metrics` (Prometheus text format) and `/healthz` over plain
//! HTTP/1.1.

use crate::apis::metrics::gather_controller_metrics;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Route one request to its handler
pub(crate) fn handle(method: &Method, path: &str) -> Response<Full<Bytes>> {
    if *method != Method::GET {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n".into());
    }
    match path {
        "/metrics" => match gather_controller_metrics() {
            Ok(text) => {
                let mut response = text_response(StatusCode::OK, text);
                response.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, e)
            }
        },
        "/healthz" => text_response(StatusCode::OK, "ok\n".into()),
        _ => text_response(StatusCode::NOT_FOUND, "not found\n".into()),
    }
}

/// Bind `addr` and serve until the task is aborted
pub async fn serve(addr: &str) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to accept metrics connection: {}", e);
                continue;
            }
        };

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(|req: Request<Incoming>| async move {
                Ok::<_, Infallible>(handle(req.method(), req.uri().path()))
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Metrics connection from {} error: {}", peer, e);
            }
        });
    }
}
