//! Verify HTTP Client
//!
//! Fetches game records from a remote verify server, so the verifier can run
//! without direct ledger access.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::game::state::GameId;
use crate::network::protocol::{ErrorBody, ErrorCode, HealthResponse, VerifyPayload, VerifyRequest};
use crate::proof::verify::{RecordSource, VerifyError};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport failure.
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    /// Server answered with a structured error.
    #[error("server returned {status}: {} ({:?})", body.message, body.code)]
    Api {
        /// HTTP status.
        status: StatusCode,
        /// Error body.
        body: ErrorBody,
    },
    /// Server answered with something unexpected.
    #[error("failed: {status}: {body}")]
    FailedWithBody {
        /// HTTP status.
        status: StatusCode,
        /// Raw body.
        body: String,
    },
    /// Base URL is not http(s).
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
}

/// Client for a verify server.
#[derive(Clone, Debug)]
pub struct VerifyClient {
    http: reqwest::Client,
    base_url: String,
}

impl VerifyClient {
    /// Create a client for `base_url` (e.g. `http://127.0.0.1:8080`).
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidScheme(base_url));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    /// Server base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the record for `game_id`. `Ok(None)` when the server reports no
    /// ciphertext for it.
    pub async fn fetch_payload(&self, game_id: GameId) -> Result<Option<VerifyPayload>, ClientError> {
        let url = format!("{}/verify", self.base_url);
        let response = self.http.post(&url).json(&VerifyRequest::new(game_id)).send().await?;
        let status = response.status();
        debug!("POST {} -> {}", url, status);

        if status == StatusCode::OK {
            return Ok(Some(response.json().await?));
        }

        let text = response.text().await?;
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) if body.code == ErrorCode::NoCiphertext => Ok(None),
            Ok(body) => Err(ClientError::Api { status, body }),
            Err(_) => Err(ClientError::FailedWithBody { status, body: text }),
        }
    }

    /// Server health.
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let response = self.http.get(format!("{}/healthz", self.base_url)).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ClientError::FailedWithBody { status, body: response.text().await? });
        }
        Ok(response.json().await?)
    }
}

impl RecordSource for VerifyClient {
    async fn fetch(&self, game_id: GameId) -> Result<Option<VerifyPayload>, VerifyError> {
        self.fetch_payload(game_id)
            .await
            .map_err(|e| VerifyError::UpstreamRead(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::net::TcpListener;

    use alloy_primitives::{Address, B256, U256};

    use crate::game::board::Board;
    use crate::game::ledger::{CreateGame, GameLedger, LedgerConfig};
    use crate::network::server::{ServerConfig, VerifyServer};
    use crate::proof::commitment::{ciphertext_commit, GameProof};
    use crate::proof::verify::{Verifier, VerifierConfig};
    use crate::store::{EncryptedBoardStore, LocalBackend, SigningIdentity, StoreConfig};

    fn auditor() -> SigningIdentity {
        SigningIdentity::from_key(&B256::repeat_byte(0xdd)).unwrap()
    }

    struct Remote {
        store: Arc<EncryptedBoardStore>,
        ledger: Arc<GameLedger>,
        server: Arc<VerifyServer<GameLedger>>,
        handle: tokio::task::JoinHandle<Result<(), crate::network::server::ServerError>>,
        base_url: String,
    }

    async fn serve() -> Remote {
        let store = Arc::new(EncryptedBoardStore::new(Arc::new(LocalBackend::new()), StoreConfig::default()));
        let ledger = Arc::new(GameLedger::new(Arc::clone(&store), LedgerConfig::default()));

        let server = Arc::new(VerifyServer::new(ServerConfig::default(), Arc::clone(&ledger)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move { running.run_on(listener).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        Remote { store, ledger, server, handle, base_url }
    }

    async fn play(remote: &Remote) -> (GameId, GameProof) {
        let player = Address::new([0xaa; 20]);
        let proof = GameProof::new(U256::from(2024u64), player, Board::from_bits(&[0, 1, 0, 0]).unwrap());
        let encrypted_board = remote.store.encrypt_board(&proof.board, player).await.unwrap();
        let id = remote
            .ledger
            .create_game(player, CreateGame {
                ciphertext_commit: Some(ciphertext_commit(&encrypted_board.handles)),
                encrypted_board,
                commit_hash: proof.commitment(),
                board_size: 4,
            })
            .await
            .unwrap();
        remote.ledger.pick_tile(player, id, 0, None).await.unwrap();
        remote.ledger.cash_out(player, id).await.unwrap();
        remote.ledger.allow_verifier(player, id, auditor().address()).await.unwrap();
        (id, proof)
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(matches!(VerifyClient::new("ftp://host"), Err(ClientError::InvalidScheme(_))));
        assert_eq!(VerifyClient::new("http://host:1/").unwrap().base_url(), "http://host:1");
    }

    #[tokio::test]
    async fn test_fetch_payload() {
        let remote = serve().await;
        let (id, proof) = play(&remote).await;
        let client = VerifyClient::new(&remote.base_url).unwrap();

        let payload = client.fetch_payload(id).await.unwrap().unwrap();
        assert_eq!(payload.player, proof.player);
        assert_eq!(payload.opened_count, 1);
        assert_eq!(payload.commit_hash, proof.commitment());

        assert!(client.fetch_payload(77).await.unwrap().is_none());
        assert_eq!(client.health().await.unwrap().status, "ok");

        remote.server.shutdown();
        remote.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_remote_verification() {
        let remote = serve().await;
        let (id, proof) = play(&remote).await;

        let client = VerifyClient::new(&remote.base_url).unwrap();
        let verifier = Verifier::new(client, Arc::clone(&remote.store), auditor(), VerifierConfig::default());
        let report = verifier.verify(id, Some(&proof)).await;
        assert!(report.valid(), "{:?}", report);

        remote.server.shutdown();
        remote.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_server_is_upstream_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = VerifyClient::with_timeout(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        let err = client.fetch(1).await.unwrap_err();
        assert!(matches!(err, VerifyError::UpstreamRead(_)));
        assert!(err.is_retryable());
    }
}
