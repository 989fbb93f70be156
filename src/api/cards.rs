use crate::api::AppState;
use crate::domain::{
    Card, CardId, CardKey, CardPatch, CloseEvent, HistoryEntry, KeyInputs, OpenContext, OpenEvent,
    TimeMs,
};
use crate::engine::{EngineError, OpenOutcome};
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntryDto {
    pub kind: String,
    pub key: String,
    pub generation: u32,
    pub at_ms: i64,
    pub quantity: String,
    pub entry_price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_percent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_amount: Option<String>,
    pub fee: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub is_simulation: bool,
}

impl From<&HistoryEntry> for HistoryEntryDto {
    fn from(e: &HistoryEntry) -> Self {
        Self {
            kind: e.kind.as_str().to_string(),
            key: e.key.to_string(),
            generation: e.generation,
            at_ms: e.at.as_ms(),
            quantity: e.quantity.to_string(),
            entry_price: e.entry_price.to_string(),
            exit_price: e.exit_price.map(|d| d.to_string()),
            pnl_percent: e.pnl_percent.map(|d| d.to_string()),
            pnl_amount: e.pnl_amount.map(|d| d.to_string()),
            fee: e.fee.to_string(),
            note: e.note.clone(),
            is_simulation: e.is_simulation,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDto {
    pub id: String,
    pub key: String,
    pub time_bucket: String,
    pub value: String,
    pub state: String,
    pub generation: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,
    pub opened_at_ms: i64,
    pub updated_at_ms: i64,
    pub removal_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub tags: Vec<String>,
    pub history: Vec<HistoryEntryDto>,
}

impl From<&Card> for CardDto {
    fn from(c: &Card) -> Self {
        Self {
            id: c.id.to_string(),
            key: c.key.to_string(),
            time_bucket: c.time_bucket.clone(),
            value: c.value.to_string(),
            state: c.state().as_str().to_string(),
            generation: c.generation,
            score: c.score.map(|d| d.to_string()),
            rank: c.rank.map(|r| r.as_str().to_string()),
            opened_at_ms: c.opened_at.as_ms(),
            updated_at_ms: c.updated_at.as_ms(),
            removal_pending: c.removal_pending,
            note: c.note.clone(),
            tags: c.tags.clone(),
            history: c.history.iter().map(HistoryEntryDto::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CardsResponse {
    pub cards: Vec<CardDto>,
}

impl CardsResponse {
    pub fn from_cards(cards: &[Card]) -> Self {
        Self {
            cards: cards.iter().map(CardDto::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenCardResponse {
    pub card: CardDto,
    pub disposition: crate::engine::Disposition,
    pub evicted: Vec<String>,
    pub swept: Vec<String>,
}

impl From<OpenOutcome> for OpenCardResponse {
    fn from(outcome: OpenOutcome) -> Self {
        Self {
            card: CardDto::from(&outcome.card),
            disposition: outcome.disposition,
            evicted: outcome.evicted.iter().map(|id| id.to_string()).collect(),
            swept: outcome.swept.iter().map(|id| id.to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenCardRequest {
    pub time_bucket: String,
    pub value: Decimal,
    #[serde(default)]
    pub quantity: Decimal,
    #[serde(default)]
    pub entry_price: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub is_simulation: bool,
    #[serde(default)]
    pub at_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseCardResponse {
    pub card: CardDto,
    pub entry: HistoryEntryDto,
    pub score: String,
    pub rank: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discarded: Option<DiscardDto>,
    pub archived: bool,
}

#[derive(Debug, Serialize)]
pub struct DiscardDto {
    pub reason: String,
    pub detail: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscardRequest {
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardCardResponse {
    pub card: CardDto,
    pub archived: bool,
}

pub(crate) fn parse_card_id(raw: &str) -> Result<CardId, AppError> {
    CardId::from_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid card id: {}", raw)))
}

pub async fn list_active(State(state): State<AppState>) -> Json<CardsResponse> {
    Json(CardsResponse::from_cards(&state.engine.list_active()))
}

pub async fn list_all(State(state): State<AppState>) -> Json<CardsResponse> {
    Json(CardsResponse::from_cards(
        &state.engine.list_all_non_removed(),
    ))
}

pub async fn get_card(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CardDto>, AppError> {
    let id = parse_card_id(&id)?;
    let card = state
        .engine
        .get_by_id(&id)
        .ok_or(EngineError::CardNotFound(id))?;
    Ok(Json(CardDto::from(&card)))
}

pub async fn get_card_by_key(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CardDto>, AppError> {
    let key = CardKey::new(key);
    let card = state
        .engine
        .get_by_key(&key)
        .ok_or(EngineError::KeyNotFound(key))?;
    Ok(Json(CardDto::from(&card)))
}

pub async fn open_card(
    State(state): State<AppState>,
    Json(req): Json<OpenCardRequest>,
) -> Result<Json<OpenCardResponse>, AppError> {
    if req.time_bucket.trim().is_empty() {
        return Err(AppError::BadRequest("timeBucket must not be empty".into()));
    }
    let inputs = KeyInputs::new(req.time_bucket.trim(), req.value);
    let ctx = OpenContext {
        quantity: req.quantity,
        entry_price: req.entry_price,
        fee: req.fee,
        note: req.note,
        is_simulation: req.is_simulation,
        at: req.at_ms.map(TimeMs::new),
    };
    let outcome = state.engine.open(&inputs, ctx)?;
    Ok(Json(OpenCardResponse::from(outcome)))
}

pub async fn record_open(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(event): Json<OpenEvent>,
) -> Result<Json<HistoryEntryDto>, AppError> {
    let id = parse_card_id(&id)?;
    let entry = state.engine.record_open_event(&id, event)?;
    Ok(Json(HistoryEntryDto::from(&entry)))
}

pub async fn record_close(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(event): Json<CloseEvent>,
) -> Result<Json<CloseCardResponse>, AppError> {
    let id = parse_card_id(&id)?;
    let outcome = state.engine.record_close_event(&id, event).await?;
    Ok(Json(CloseCardResponse {
        card: CardDto::from(&outcome.card),
        entry: HistoryEntryDto::from(&outcome.entry),
        score: outcome.score.to_string(),
        rank: outcome.rank.as_str().to_string(),
        discarded: outcome.discarded.map(|reason| DiscardDto {
            reason: reason.code().to_string(),
            detail: reason.detail(),
        }),
        archived: outcome.archived,
    }))
}

pub async fn remove_card(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_card_id(&id)?;
    let removed = state.engine.remove(&id)?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

pub async fn discard_card(
    Path(id): Path<String>,
    State(state): State<AppState>,
    body: Option<Json<DiscardRequest>>,
) -> Result<Json<DiscardCardResponse>, AppError> {
    let id = parse_card_id(&id)?;
    let detail = body
        .and_then(|Json(req)| req.detail)
        .unwrap_or_else(|| "manual discard".to_string());
    let outcome = state.engine.discard(&id, &detail).await?;
    Ok(Json(DiscardCardResponse {
        card: CardDto::from(&outcome.card),
        archived: outcome.archived,
    }))
}

pub async fn update_card(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(patch): Json<CardPatch>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_card_id(&id)?;
    let updated = state.engine.update_fields(&id, &patch)?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}
