//! Card record codec: versioned JSON envelope inside an lz4 frame.
//!
//! Decoding is the validation boundary. Anything that fails here is a
//! corrupt record; the loader logs it and moves on.

use super::{RawRecord, RecordMetadata};
use crate::domain::{Card, TimeMs};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

pub const CARD_RECORD_KIND: &str = "card";
pub const ARCHIVE_RECORD_KIND: &str = "card_archive";

const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("lz4 decode error: {0}")]
    Decompress(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected record kind {expected}, found {found}")]
    KindMismatch { expected: String, found: String },
    #[error("invalid record: {0}")]
    Invalid(String),
}

/// Why and when a card went to the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveNote {
    pub reason: String,
    pub detail: String,
    pub archived_at: TimeMs,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    kind: &'a str,
    card: &'a Card,
    #[serde(skip_serializing_if = "Option::is_none")]
    archive: Option<&'a ArchiveNote>,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    kind: String,
    card: Card,
    #[serde(default)]
    archive: Option<ArchiveNote>,
}

/// Serialize the full card (history included) for `kind`.
pub fn encode_card(
    kind: &str,
    card: &Card,
    archive: Option<&ArchiveNote>,
) -> Result<(Vec<u8>, RecordMetadata), RecordError> {
    let json = serde_json::to_vec(&EnvelopeRef {
        version: ENVELOPE_VERSION,
        kind,
        card,
        archive,
    })?;

    let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
    encoder
        .write_all(&json)
        .map_err(|e| RecordError::Decompress(e.to_string()))?;
    let payload = encoder
        .finish()
        .map_err(|e| RecordError::Decompress(e.to_string()))?;

    let metadata = RecordMetadata {
        kind: kind.to_string(),
        record_id: card.id.to_string(),
        key: Some(card.key.to_string()),
        opened_at: Some(card.opened_at.as_ms()),
        updated_at: Some(card.updated_at.as_ms()),
    };
    Ok((payload, metadata))
}

/// Rebuild a card from a record of `kind`, truncating history to `max_history`.
pub fn decode_card(record: &RawRecord, kind: &str, max_history: usize) -> Result<Card, RecordError> {
    decode(record, kind, max_history).map(|(card, _)| card)
}

/// Rebuild an archived card along with its archive note.
pub fn decode_archived(
    record: &RawRecord,
    max_history: usize,
) -> Result<(Card, Option<ArchiveNote>), RecordError> {
    decode(record, ARCHIVE_RECORD_KIND, max_history)
}

fn decode(
    record: &RawRecord,
    kind: &str,
    max_history: usize,
) -> Result<(Card, Option<ArchiveNote>), RecordError> {
    if record.metadata.kind != kind {
        return Err(RecordError::KindMismatch {
            expected: kind.to_string(),
            found: record.metadata.kind.clone(),
        });
    }

    let mut decoder = lz4_flex::frame::FrameDecoder::new(record.payload.as_slice());
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| RecordError::Decompress(e.to_string()))?;

    let envelope: Envelope = serde_json::from_slice(&json)?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(RecordError::Invalid(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }
    if envelope.kind != kind {
        return Err(RecordError::KindMismatch {
            expected: kind.to_string(),
            found: envelope.kind,
        });
    }

    let mut card = envelope.card;
    if card.id.to_string() != record.metadata.record_id {
        return Err(RecordError::Invalid(format!(
            "payload id {} does not match record id {}",
            card.id, record.metadata.record_id
        )));
    }
    if card.key.as_str().is_empty() {
        return Err(RecordError::Invalid("empty key".to_string()));
    }
    if card.generation == 0 {
        return Err(RecordError::Invalid("generation must be at least 1".to_string()));
    }

    card.history.truncate(max_history);
    Ok((card, envelope.archive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CardKey, CloseEvent, KeyInputs, OpenContext};
    use rust_decimal::Decimal;

    fn sample() -> Card {
        let inputs = KeyInputs::new("5m", Decimal::new(42, 2));
        let mut card = Card::open(
            CardKey::new("5m:0.42"),
            &inputs,
            &OpenContext::at(TimeMs::new(10)),
            TimeMs::new(10),
        );
        for i in 0..4 {
            card.reactivate(&OpenContext::default(), TimeMs::new(20 + i), 50)
                .unwrap();
        }
        card.close(&CloseEvent::with_pnl(Decimal::from(3)), TimeMs::new(40), 50)
            .unwrap();
        card
    }

    fn record(kind: &str, card: &Card) -> RawRecord {
        let (payload, metadata) = encode_card(kind, card, None).unwrap();
        RawRecord {
            key_path: "p".to_string(),
            payload,
            metadata,
        }
    }

    #[test]
    fn test_card_survives_encode_decode() {
        let card = sample();
        let decoded = decode_card(&record(CARD_RECORD_KIND, &card), CARD_RECORD_KIND, 50).unwrap();
        assert_eq!(decoded, card);
    }

    #[test]
    fn test_decode_truncates_history_tail() {
        let card = sample();
        assert_eq!(card.history.len(), 6);
        let decoded = decode_card(&record(CARD_RECORD_KIND, &card), CARD_RECORD_KIND, 2).unwrap();
        assert_eq!(decoded.history.len(), 2);
        assert_eq!(decoded.history.latest(), card.history.latest());
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        let mut rec = record(CARD_RECORD_KIND, &sample());
        rec.payload = b"not an lz4 frame".to_vec();
        assert!(matches!(
            decode_card(&rec, CARD_RECORD_KIND, 50),
            Err(RecordError::Decompress(_))
        ));
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let mut rec = record(CARD_RECORD_KIND, &sample());
        rec.payload.truncate(rec.payload.len() / 2);
        assert!(decode_card(&rec, CARD_RECORD_KIND, 50).is_err());
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let rec = record(ARCHIVE_RECORD_KIND, &sample());
        assert!(matches!(
            decode_card(&rec, CARD_RECORD_KIND, 50),
            Err(RecordError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_id_mismatch_is_rejected() {
        let mut rec = record(CARD_RECORD_KIND, &sample());
        rec.metadata.record_id = "someone-else".to_string();
        assert!(matches!(
            decode_card(&rec, CARD_RECORD_KIND, 50),
            Err(RecordError::Invalid(_))
        ));
    }

    #[test]
    fn test_archive_note_round_trips() {
        let card = sample();
        let note = ArchiveNote {
            reason: "manual".to_string(),
            detail: "operator".to_string(),
            archived_at: TimeMs::new(99),
        };
        let (payload, metadata) = encode_card(ARCHIVE_RECORD_KIND, &card, Some(&note)).unwrap();
        let rec = RawRecord {
            key_path: "p".to_string(),
            payload,
            metadata,
        };
        let (decoded, decoded_note) = decode_archived(&rec, 50).unwrap();
        assert_eq!(decoded.id, card.id);
        assert_eq!(decoded_note, Some(note));
    }
}
