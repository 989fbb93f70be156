pub mod archive;
pub mod cards;
pub mod health;

use crate::config::Config;
use crate::engine::CardEngine;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CardEngine>,
    pub config: Config,
}

impl AppState {
    pub fn new(engine: Arc<CardEngine>, config: Config) -> Self {
        Self { engine, config }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/cards", get(cards::list_active).post(cards::open_card))
        .route("/v1/cards/all", get(cards::list_all))
        .route("/v1/cards/key/:key", get(cards::get_card_by_key))
        .route(
            "/v1/cards/:id",
            get(cards::get_card)
                .delete(cards::remove_card)
                .patch(cards::update_card),
        )
        .route("/v1/cards/:id/events/open", post(cards::record_open))
        .route("/v1/cards/:id/events/close", post(cards::record_close))
        .route("/v1/cards/:id/discard", post(cards::discard_card))
        .route("/v1/archive", get(archive::list_archived))
        .route("/v1/archive/:id/restore", post(archive::restore_archived))
        .layer(cors)
        .with_state(state)
}
