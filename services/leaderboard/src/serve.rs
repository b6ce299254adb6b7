//! Long-running mode: periodic recompute and the `/leaderboard` route.
//!
//! The last good board is cached and served; readiness follows the outcome
//! of the most recent refresh.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use moltrank_core::{clear_ready, mark_ready};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::aggregator::LeaderboardEngine;
use crate::view::{ErrorResponse, LeaderboardResponse};

#[derive(Debug, Default)]
pub struct BoardCache {
    board: RwLock<Option<Arc<LeaderboardResponse>>>,
}

impl BoardCache {
    pub fn new() -> Self { Self::default() }

    pub fn latest(&self) -> Option<Arc<LeaderboardResponse>> { self.board.read().clone() }

    pub fn store(&self, board: LeaderboardResponse) { *self.board.write() = Some(Arc::new(board)); }
}

/// Recomputes once. A fresh board replaces the cached one and marks the
/// service ready; a failed run clears readiness and keeps the stale board.
pub async fn refresh_once(engine: &LeaderboardEngine, cache: &BoardCache) -> bool {
    match engine.compute_leaderboard().await {
        Ok(board) => {
            if !board.is_complete() {
                warn!(failed_windows = board.failed_windows.len(), failed_lookups = board.failed_lookups, "leaderboard incomplete");
            }
            info!(entries = board.entries.len(), head = board.head, "leaderboard refreshed");
            cache.store(LeaderboardResponse::from(&board));
            mark_ready();
            true
        }
        Err(e) => {
            // the engine already counted the failure
            warn!(error = %e, stale = cache.latest().is_some(), "leaderboard refresh failed");
            clear_ready();
            false
        }
    }
}

pub async fn refresh_loop(engine: &LeaderboardEngine, cache: &BoardCache, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        refresh_once(engine, cache).await;
    }
}

pub fn routes(cache: Arc<BoardCache>) -> Router {
    Router::new().route("/leaderboard", get(leaderboard_handler)).with_state(cache)
}

async fn leaderboard_handler(State(cache): State<Arc<BoardCache>>) -> Response {
    match cache.latest() {
        Some(board) => Json(&*board).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse::new("Failed to fetch leaderboard"))).into_response(),
    }
}
