//! Verify Protocol Messages
//!
//! JSON over HTTP. One request, one canonical record view, one error body.
//!
//! ## Flow
//!
//! ```text
//! Client                            Server
//!   |                                 |
//!   |-- POST /verify {gameId} ------->|
//!   |<--------- 200 VerifyPayload ----|
//!   |<--------- 400 ErrorBody --------|  (invalid_input, no_ciphertext)
//!   |<--------- 500 ErrorBody --------|  (upstream_read_failure)
//! ```

use serde::{Deserialize, Serialize};

use alloy_primitives::{Address, B256};

use crate::core::fixed::Milli;
use crate::core::uint::{self, U256};
use crate::game::board::Board;
use crate::game::state::{GameId, GameRecord, GameState, OpenedBitmap, PickRecord};
use crate::store::{BoardLayout, CiphertextHandle};

/// Game id as sent by clients: a JSON number or a decimal string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GameIdParam {
    /// `{"gameId": 1}`
    Number(u64),
    /// `{"gameId": "1"}`
    Text(String),
}

impl GameIdParam {
    /// Parse into a [`GameId`].
    pub fn parse(&self) -> Option<GameId> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// `POST /verify` body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// Game to fetch.
    #[serde(default)]
    pub game_id: Option<GameIdParam>,
}

impl VerifyRequest {
    /// Request for `game_id`.
    pub fn new(game_id: GameId) -> Self {
        Self { game_id: Some(GameIdParam::Number(game_id)) }
    }
}

/// Everything a verifier needs about one game.
///
/// This is the only shape a game record travels in; the HTTP server, the
/// HTTP client and the in-process verifier all use it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPayload {
    /// Game id.
    pub game_id: GameId,
    /// Board ciphertext handles.
    pub ciphertexts: Vec<CiphertextHandle>,
    /// Ledger contract the ciphertexts belong to.
    pub contract_address: Address,
    /// Player address.
    pub player: Address,
    /// Number of tiles.
    pub board_size: u8,
    /// Ciphertext layout.
    pub layout: BoardLayout,
    /// Seed commitment.
    pub commit_hash: B256,
    /// Digest over the handles, if recorded.
    pub ciphertext_commit: Option<B256>,
    /// Tiles opened.
    pub opened_count: u8,
    /// Opened tiles as a 256-bit mask.
    pub opened_bitmap: OpenedBitmap,
    /// Ledger multiplier.
    pub multiplier: Milli,
    /// Lifecycle state.
    pub state: GameState,
    /// Whether the seed has been revealed.
    pub seed_revealed: bool,
    /// Seed, once revealed.
    #[serde(with = "uint::option_decimal", default)]
    pub revealed_seed: Option<U256>,
    /// Player-claimed board, once revealed.
    pub revealed_board: Option<Board>,
    /// Picks in order.
    pub picks: Vec<PickRecord>,
}

impl VerifyPayload {
    /// Build from a ledger record.
    pub fn from_record(record: &GameRecord, contract_address: Address) -> Self {
        Self {
            game_id: record.id,
            ciphertexts: record.encrypted_board.handles.clone(),
            contract_address,
            player: record.player,
            board_size: record.board_size,
            layout: record.encrypted_board.layout,
            commit_hash: record.commit_hash,
            ciphertext_commit: record.ciphertext_commit,
            opened_count: record.opened_count(),
            opened_bitmap: record.opened,
            multiplier: record.multiplier,
            state: record.state,
            seed_revealed: record.is_seed_revealed(),
            revealed_seed: record.revealed_seed,
            revealed_board: record.revealed_board.clone(),
            picks: record.picks.clone(),
        }
    }
}

/// Machine-readable error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Missing or malformed request.
    InvalidInput,
    /// Unknown game or a game with no ciphertext.
    NoCiphertext,
    /// Wrong HTTP method.
    MethodNotAllowed,
    /// Record source failed.
    UpstreamReadFailure,
}

impl ErrorCode {
    /// HTTP status for this code.
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput | Self::NoCiphertext => 400,
            Self::MethodNotAllowed => 405,
            Self::UpstreamReadFailure => 500,
        }
    }
}

/// Error response body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorBody {
    /// Build an error body.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// `GET /healthz` body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
    /// Server version.
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::commitment::commit;
    use crate::store::{EncryptedBoard, InputProof};

    #[test]
    fn test_game_id_param() {
        let req: VerifyRequest = serde_json::from_str(r#"{"gameId": 7}"#).unwrap();
        assert_eq!(req.game_id.unwrap().parse(), Some(7));

        let req: VerifyRequest = serde_json::from_str(r#"{"gameId": "12"}"#).unwrap();
        assert_eq!(req.game_id.unwrap().parse(), Some(12));

        let req: VerifyRequest = serde_json::from_str(r#"{"gameId": "x"}"#).unwrap();
        assert_eq!(req.game_id.unwrap().parse(), None);

        let req: VerifyRequest = serde_json::from_str("{}").unwrap();
        assert!(req.game_id.is_none());
    }

    #[test]
    fn test_payload_field_names() {
        let player = Address::repeat_byte(0xaa);
        let mut record = GameRecord::new(
            3,
            player,
            5,
            EncryptedBoard {
                layout: BoardLayout::Packed,
                handles: vec![CiphertextHandle([0x11; 32])],
                proof: InputProof::default(),
            },
            commit(&U256::from(1u64), &player, 5),
            None,
        );
        record.opened.insert(0);

        let json = serde_json::to_value(VerifyPayload::from_record(&record, Address::repeat_byte(0xcc))).unwrap();
        for key in [
            "ciphertexts",
            "contractAddress",
            "player",
            "boardSize",
            "commitHash",
            "openedCount",
            "openedBitmap",
            "multiplier",
            "state",
            "seedRevealed",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["layout"], "packed");
        assert_eq!(json["multiplier"], 1000);
        assert_eq!(json["state"], "created");
        assert_eq!(json["seedRevealed"], false);

        let back: VerifyPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.opened_bitmap, record.opened);
    }

    #[test]
    fn test_error_codes() {
        let body = ErrorBody::new(ErrorCode::NoCiphertext, "no ciphertext");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "no_ciphertext");
        assert_eq!(ErrorCode::NoCiphertext.http_status(), 400);
        assert_eq!(ErrorCode::MethodNotAllowed.http_status(), 405);
        assert_eq!(ErrorCode::UpstreamReadFailure.http_status(), 500);
    }
}
