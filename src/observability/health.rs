//! Health check HTTP server
//!
//! Serves the supervisor's latest [`FleetHealth`] snapshot to operators and
//! container orchestration probes. The server only reads snapshots; it never
//! touches a session.

use crate::fleet::{FleetHealth, FleetStatus};
use crate::observability::metrics::metrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use warp::http::StatusCode;
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    port: u16,
    health: watch::Receiver<FleetHealth>,
}

impl HealthServer {
    pub fn new(port: u16, health: watch::Receiver<FleetHealth>) -> Self {
        Self { port, health }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// All endpoints as one warp filter
    pub fn routes(
        &self,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone + Send + Sync + 'static
    {
        let health_rx = self.health.clone();
        let ready_rx = self.health.clone();

        // GET /health - 200 only when every session is connected
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let snapshot = health_rx.borrow().clone();
                async move {
                    let status = if snapshot.is_fully_connected() {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&snapshot),
                        status,
                    ))
                }
            });

        // GET /metrics
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(|| async move {
                Ok::<_, Infallible>(warp::reply::json(&metrics().get_metrics()))
            });

        // GET /ready - at least one session can publish
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let snapshot = ready_rx.borrow().clone();
                async move {
                    let ready = snapshot.any_connected() && snapshot.status != FleetStatus::Stopped;
                    let response = ReadinessResponse {
                        ready,
                        connected: snapshot.connected,
                        total_agents: snapshot.total_agents,
                        timestamp: current_timestamp(),
                    };
                    let status = if ready {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&response),
                        status,
                    ))
                }
            });

        // GET /live
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(|| async move {
                let response = LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                };
                Ok::<_, Infallible>(warp::reply::json(&response))
            });

        // GET / - endpoint index
        let root_route = warp::path::end().and(warp::get()).and_then(|| async move {
            let endpoints = BTreeMap::from([
                ("/health", "Fleet snapshot; 200 when every session is connected"),
                ("/metrics", "Sampling and link counters"),
                ("/ready", "Readiness probe; 200 when any session is connected"),
                ("/live", "Liveness probe"),
            ]);
            Ok::<_, Infallible>(warp::reply::json(&ApiDocumentationResponse { endpoints }))
        });

        health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(root_route)
            .with(warp::cors().allow_any_origin())
    }

    /// Serve until the process exits
    pub async fn start(self) {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        tracing::info!(port = self.port, "Starting health server");
        warp::serve(self.routes()).run(addr).await;
    }
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    connected: usize,
    total_agents: usize,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: BTreeMap<&'static str, &'static str>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(status: FleetStatus, connected: usize, total: usize) -> FleetHealth {
        FleetHealth {
            status,
            total_agents: total,
            connected,
            ..FleetHealth::empty()
        }
    }

    fn server(health: FleetHealth) -> (HealthServer, watch::Sender<FleetHealth>) {
        let (tx, rx) = watch::channel(health);
        (HealthServer::new(8080, rx), tx)
    }

    #[tokio::test]
    async fn test_health_reflects_fleet_status() {
        let (server, tx) = server(snapshot(FleetStatus::Healthy, 2, 2));
        let routes = server.routes();

        let resp = warp::test::request().path("/health").reply(&routes).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["status"], "healthy");

        tx.send_replace(snapshot(FleetStatus::Degraded, 1, 2));
        let resp = warp::test::request().path("/health").reply(&routes).await;
        assert_eq!(resp.status(), 503);
    }

    #[tokio::test]
    async fn test_ready_needs_one_connected_session() {
        let (server, tx) = server(snapshot(FleetStatus::Down, 0, 3));
        let routes = server.routes();

        let resp = warp::test::request().path("/ready").reply(&routes).await;
        assert_eq!(resp.status(), 503);

        tx.send_replace(snapshot(FleetStatus::Degraded, 1, 3));
        let resp = warp::test::request().path("/ready").reply(&routes).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["connected"], 1);
    }

    #[tokio::test]
    async fn test_live_and_metrics() {
        let (server, _tx) = server(FleetHealth::empty());
        let routes = server.routes();

        let resp = warp::test::request().path("/live").reply(&routes).await;
        assert_eq!(resp.status(), 200);

        let resp = warp::test::request().path("/metrics").reply(&routes).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert!(body.get("sampling").is_some());
        assert!(body.get("link").is_some());
    }

    #[tokio::test]
    async fn test_unknown_path_not_found() {
        let (server, _tx) = server(FleetHealth::empty());
        let resp = warp::test::request()
            .path("/nope")
            .reply(&server.routes())
            .await;
        assert_eq!(resp.status(), 404);
    }
}
