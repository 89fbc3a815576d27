use crate::monitor::model::TrainingStatus;
use anyhow::Context;
use log::info;
use std::{
    net::SocketAddr,
    sync::{Arc, RwLock},
    thread,
};
use tokio::runtime::Builder;
use warp::Filter;

pub fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

fn read_status(state: &RwLock<TrainingStatus>) -> TrainingStatus {
    match state.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Shares the latest [`TrainingStatus`] and optionally exposes it on `GET /status`.
#[derive(Default)]
pub struct StatusBridge {
    state: Arc<RwLock<TrainingStatus>>,
}

impl StatusBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routes(
        &self,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let state = self.state.clone();
        warp::path("status")
            .and(warp::path::end())
            .and(warp::get())
            .map(move || warp::reply::json(&read_status(&state)))
    }

    /// Binds the HTTP endpoint and serves it on a background thread with its
    /// own runtime. Returns the bound address, so port 0 picks a free port.
    pub fn serve(
        &self,
        addr: SocketAddr,
    ) -> anyhow::Result<(SocketAddr, thread::JoinHandle<()>)> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("creating runtime for the status endpoint")?;
        let routes = self.routes();
        let (bound, server) = {
            let _guard = runtime.enter();
            warp::serve(routes)
                .try_bind_ephemeral(addr)
                .with_context(|| format!("binding status endpoint to {}", addr))?
        };
        info!("status endpoint listening on http://{}/status", bound);
        let handle = thread::spawn(move || runtime.block_on(server));
        Ok((bound, handle))
    }

    pub fn publish(&self, status: TrainingStatus) {
        match self.state.write() {
            Ok(mut guard) => *guard = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    pub fn snapshot(&self) -> TrainingStatus {
        read_status(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::model::TrainingPhase;

    #[test]
    fn bridge_updates_state() {
        let bridge = StatusBridge::new();
        bridge.publish(TrainingStatus {
            phase: TrainingPhase::Training,
            epoch: 3,
            ..TrainingStatus::default()
        });
        assert_eq!(bridge.snapshot().epoch, 3);
    }

    #[tokio::test]
    async fn status_route_serves_json() {
        let bridge = StatusBridge::new();
        bridge.publish(TrainingStatus {
            phase: TrainingPhase::EpochDone,
            epoch: 1,
            total_epochs: 4,
            val_accuracy: Some(0.5),
            learning_rate: 1e-3,
            ..TrainingStatus::default()
        });

        let response = warp::test::request()
            .method("GET")
            .path("/status")
            .reply(&bridge.routes())
            .await;
        assert_eq!(response.status(), 200);
        let body: TrainingStatus = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body.phase, TrainingPhase::EpochDone);
        assert_eq!(body.val_accuracy, Some(0.5));
    }

    #[test]
    fn serve_reports_bound_address() {
        let bridge = StatusBridge::new();
        let (bound, _handle) = bridge.serve(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        assert_ne!(bound.port(), 0);
        assert!(std::net::TcpStream::connect(bound).is_ok());
    }

    #[test]
    fn serve_fails_when_address_is_taken() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let bridge = StatusBridge::new();
        assert!(bridge.serve(addr).is_err());
    }

    #[tokio::test]
    async fn other_paths_are_rejected() {
        let bridge = StatusBridge::new();
        let response = warp::test::request()
            .method("GET")
            .path("/payload")
            .reply(&bridge.routes())
            .await;
        assert_eq!(response.status(), 404);
    }
}
