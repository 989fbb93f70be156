use crate::api::cards::{parse_card_id, CardsResponse, OpenCardResponse};
use crate::api::AppState;
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;

pub async fn list_archived(State(state): State<AppState>) -> Result<Json<CardsResponse>, AppError> {
    let cards = state.engine.list_archived().await?;
    Ok(Json(CardsResponse::from_cards(&cards)))
}

pub async fn restore_archived(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<OpenCardResponse>, AppError> {
    let id = parse_card_id(&id)?;
    let outcome = state.engine.restore_archived(&id).await?;
    Ok(Json(OpenCardResponse::from(outcome)))
}
