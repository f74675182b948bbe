//! HTTP ask endpoint.
//!
//! The thin synchronous surface the reverse proxy calls on every
//! unrecognized TLS handshake. Follows the on-demand TLS "ask"
//! convention: the candidate hostname arrives in the `domain` query
//! parameter, 200 means issue, any other status means do not.
//!
//! The caller is blocking a TLS negotiation, so every ask request runs
//! under a hard internal deadline; expiry resolves to a deny rather
//! than a hang.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::engine::DecisionEngine;
use crate::errors::GateError;
use crate::metrics::GateMetrics;

/// Ask path used in the proxy's on-demand TLS configuration
pub const ASK_PATH: &str = "/ask";

/// Shared state for the ask endpoint
pub struct GateState {
    pub engine: Arc<DecisionEngine>,
    pub metrics: Arc<GateMetrics>,
    /// Hard deadline for answering one ask request
    pub ask_timeout: Duration,
    /// Honor `X-Forwarded-For` as the rate key
    pub trust_forwarded: bool,
}

/// Run the ask endpoint until the process exits
pub async fn run(state: Arc<GateState>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind ask listener on {addr}"))?;

    info!(address = %addr, "Ask endpoint listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                continue;
            }
        };

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(handle(req, state, peer.ip()).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(peer = %peer, error = %e, "Connection error");
            }
        });
    }
}

/// Route one request
///
/// Generic over the body type: the ask protocol never reads the body,
/// which also lets tests drive this without a network connection.
pub async fn handle<B>(req: Request<B>, state: Arc<GateState>, peer: IpAddr) -> Response<Full<Bytes>> {
    let path = req.uri().path();

    if req.method() == Method::GET && path == "/healthz" {
        return text_response(StatusCode::OK, "ok");
    }

    if req.method() == Method::GET && path == "/metrics" {
        return match state.metrics.encode() {
            Ok(body) => text_response(StatusCode::OK, &body),
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
            }
        };
    }

    if path == ASK_PATH || path == "/" {
        if req.method() == Method::GET || req.method() == Method::POST {
            return handle_ask(req, state, peer).await;
        }
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "denied");
    }

    text_response(StatusCode::NOT_FOUND, "not found")
}

/// Answer one ask request
async fn handle_ask<B>(
    req: Request<B>,
    state: Arc<GateState>,
    peer: IpAddr,
) -> Response<Full<Bytes>> {
    let Some(domain) = extract_domain(&req) else {
        debug!(peer = %peer, "Ask request without domain parameter");
        return text_response(StatusCode::BAD_REQUEST, "missing domain parameter");
    };

    let client = client_address(&req, peer, state.trust_forwarded);

    // The decision runs on the blocking pool so the deadline can fire
    // even if it stalls; a handshake must never wait on a slow answer.
    let engine = Arc::clone(&state.engine);
    let decision = tokio::task::spawn_blocking(move || {
        engine.decide(&domain, &client, Instant::now())
    });

    tokio::select! {
        biased;
        _ = tokio::time::sleep(state.ask_timeout) => {
            let err = GateError::InternalTimeout(state.ask_timeout);
            error!(peer = %peer, error = %err, "Ask request hit internal deadline, denying");
            state.metrics.record_timeout();
            // The abandoned decision still completes in the background;
            // its tracker charge is retained so retries cannot evade
            // the rate limit.
            text_response(StatusCode::FORBIDDEN, "denied")
        }
        joined = decision => match joined {
            Ok(decision) if decision.allowed => text_response(StatusCode::OK, "allowed"),
            Ok(_) => text_response(StatusCode::FORBIDDEN, "denied"),
            Err(e) => {
                error!(peer = %peer, error = %e, "Decision task failed, denying");
                text_response(StatusCode::FORBIDDEN, "denied")
            }
        },
    }
}

/// Pull the candidate hostname out of the `domain` query parameter
fn extract_domain<B>(req: &Request<B>) -> Option<String> {
    let query = req.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "domain")
        .map(|(_, value)| value.into_owned())
}

/// Resolve the requesting client's address.
///
/// The proxy terminates the TLS client, so the peer address of the ask
/// call is the proxy itself. When `trust_forwarded` is set the first
/// `X-Forwarded-For` hop is used as the rate key instead; the header is
/// attacker-controlled unless only a trusted proxy can reach the
/// listener, so it is ignored by default.
fn client_address<B>(req: &Request<B>, peer: IpAddr, trust_forwarded: bool) -> String {
    if !trust_forwarded {
        return peer.to_string();
    }

    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| peer.to_string())
}

fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyStore;
    use crate::tracker::AbuseTracker;
    use certgate_config::PolicyEntry;

    fn state(per_client: u32) -> Arc<GateState> {
        build_state(per_client, Duration::from_millis(250), true)
    }

    fn build_state(per_client: u32, ask_timeout: Duration, trust_forwarded: bool) -> Arc<GateState> {
        let metrics = Arc::new(GateMetrics::new());
        let store = Arc::new(PolicyStore::new(&[PolicyEntry {
            pattern: "*.pds.snek.cc".to_string(),
            allow: true,
        }]));
        let tracker = Arc::new(AbuseTracker::new(Duration::from_secs(60), 64));
        let engine = Arc::new(DecisionEngine::new(
            store,
            tracker,
            Arc::clone(&metrics),
            per_client,
            50,
        ));
        Arc::new(GateState {
            engine,
            metrics,
            ask_timeout,
            trust_forwarded,
        })
    }

    fn peer() -> IpAddr {
        "127.0.0.1".parse().expect("valid address")
    }

    fn get(uri: &str) -> Request<()> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(())
            .expect("valid request")
    }

    #[tokio::test]
    async fn test_ask_allowed_returns_200() {
        let response = handle(get("/ask?domain=foo.pds.snek.cc"), state(5), peer()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ask_denied_returns_403() {
        let response = handle(get("/ask?domain=other.example.com"), state(5), peer()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_ask_missing_domain_returns_400() {
        let response = handle(get("/ask"), state(5), peer()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ask_rate_limited_returns_403() {
        let state = state(2);

        for _ in 0..2 {
            let response = handle(
                get("/ask?domain=foo.pds.snek.cc"),
                Arc::clone(&state),
                peer(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = handle(get("/ask?domain=foo.pds.snek.cc"), state, peer()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_ask_root_path_accepted() {
        let response = handle(get("/?domain=foo.pds.snek.cc"), state(5), peer()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_ask_accepted() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/ask?domain=foo.pds.snek.cc")
            .body(())
            .expect("valid request");

        let response = handle(request, state(5), peer()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path_404() {
        let response = handle(get("/other"), state(5), peer()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_method_rejected() {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/ask?domain=foo.pds.snek.cc")
            .body(())
            .expect("valid request");

        let response = handle(request, state(5), peer()).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_forwarded_client_used_as_rate_key() {
        let state = state(1);

        let request_for = |ip: &str| {
            Request::builder()
                .method(Method::GET)
                .uri("/ask?domain=foo.pds.snek.cc")
                .header("x-forwarded-for", ip)
                .body(())
                .expect("valid request")
        };

        // First client exhausts its budget of one
        let response = handle(request_for("203.0.113.5"), Arc::clone(&state), peer()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = handle(request_for("203.0.113.5"), Arc::clone(&state), peer()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // A different forwarded client still has its own budget
        let response = handle(request_for("203.0.113.9"), state, peer()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_untrusted_forwarded_header_ignored() {
        let state = build_state(1, Duration::from_millis(250), false);

        let request_for = |ip: &str| {
            Request::builder()
                .method(Method::GET)
                .uri("/ask?domain=foo.pds.snek.cc")
                .header("x-forwarded-for", ip)
                .body(())
                .expect("valid request")
        };

        // Without a trusted proxy the spoofed header must not mint a
        // fresh budget; both requests charge the peer address.
        let response = handle(request_for("203.0.113.5"), Arc::clone(&state), peer()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = handle(request_for("203.0.113.9"), state, peer()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_expired_deadline_resolves_to_deny() {
        // A zero deadline has always already expired, so even an
        // allowed hostname must come back 403.
        let state = build_state(5, Duration::ZERO, true);

        let response = handle(
            get("/ask?domain=foo.pds.snek.cc"),
            Arc::clone(&state),
            peer(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let exposition = state.metrics.encode().expect("metrics encode");
        assert!(exposition.contains("certgate_ask_timeouts_total 1"));
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = handle(get("/healthz"), state(5), peer()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let state = state(5);
        handle(get("/ask?domain=foo.pds.snek.cc"), Arc::clone(&state), peer()).await;

        let response = handle(get("/metrics"), state, peer()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
