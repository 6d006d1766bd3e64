//! Mines Fair Verify Server
//!
//! Hosts a game ledger over the in-process encryption backend and serves
//! `POST /verify` for auditors. With `MINES_DEMO=1` a finished demo game is
//! played and verified at startup.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mines_fair::{
    core::U256,
    game::{pick_tile_local, CreateGame, Difficulty, GameLedger, LedgerConfig, LocalPick, LocalProgress, OutcomeMode},
    network::{ServerConfig, VerifyServer},
    proof::{ciphertext_commit, GameProof, Verifier, VerifierConfig},
    store::{EncryptedBoardStore, LocalBackend, SigningIdentity, StoreConfig},
    VERSION,
};

/// Safe tiles the demo player opens before cashing out.
const DEMO_TARGET: u32 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let default_level = if cfg!(feature = "debug-tracing") { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    info!("Mines Fair Server v{}", VERSION);

    let store_config = StoreConfig::from_env().context("store configuration")?;
    let ledger_config = LedgerConfig::from_env().context("ledger configuration")?;
    let server_config = ServerConfig::from_env().context("server configuration")?;
    info!(
        "Layout: {}, outcome: {}, contract: {}",
        store_config.layout.as_str(),
        ledger_config.outcome,
        store_config.contract
    );

    let store = Arc::new(EncryptedBoardStore::new(Arc::new(LocalBackend::new()), store_config));
    let ledger = Arc::new(GameLedger::new(Arc::clone(&store), ledger_config));

    if demo_enabled() {
        demo_game(&store, &ledger).await.context("demo game")?;
    }

    let server = Arc::new(VerifyServer::new(server_config, ledger));
    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_server.shutdown();
        }
    });

    server.run().await.context("verify server")?;
    info!("Server stopped");
    Ok(())
}

fn demo_enabled() -> bool {
    matches!(std::env::var("MINES_DEMO").as_deref(), Ok("1") | Ok("true") | Ok("yes"))
}

/// Play one game end to end and verify it.
async fn demo_game(store: &Arc<EncryptedBoardStore>, ledger: &Arc<GameLedger>) -> anyhow::Result<()> {
    info!("=== Starting Demo Game ===");

    let player = SigningIdentity::random().address();
    let auditor = SigningIdentity::random();
    info!("Player {}, auditor {}", player, auditor.address());

    let proof = GameProof::generate(U256::from(123456u64), player, 5, Difficulty::Medium)?;
    info!("Board: {} tiles, {} bombs", proof.board_size, proof.board.bomb_count());

    let encrypted_board = store.encrypt_board(&proof.board, player).await?;
    let game_id = ledger
        .create_game(player, CreateGame {
            ciphertext_commit: Some(ciphertext_commit(&encrypted_board.handles)),
            encrypted_board,
            commit_hash: proof.commitment(),
            board_size: proof.board_size,
        })
        .await?;
    info!("Game {} created, commit {}", game_id, proof.commitment());

    let mut progress = LocalProgress::default();
    let mut boom = false;
    for index in 0..proof.board_size {
        if progress.safe_count >= DEMO_TARGET {
            break;
        }
        let guess = match ledger.outcome_mode() {
            OutcomeMode::OnChainCompared => Some(store.encrypt_input(vec![0], player).await?),
            OutcomeMode::ClientDeclared => None,
        };
        ledger.pick_tile(player, game_id, index, guess).await?;

        match pick_tile_local(&proof.board, index, &progress)? {
            LocalPick::Safe { progress: next } => progress = next,
            LocalPick::Boom { progress: next } => {
                progress = next;
                boom = true;
                break;
            }
        }
    }

    if boom {
        ledger.end_as_boom(player, game_id).await?;
        info!("Game {}: boom after {} safe tile(s)", game_id, progress.safe_count);
    } else {
        ledger.cash_out(player, game_id).await?;
        info!("Game {}: cashed out at {}", game_id, progress.multiplier);
    }

    ledger
        .reveal_game(player, game_id, proof.board.clone(), Some(proof.seed))
        .await?;
    ledger.allow_verifier(player, game_id, auditor.address()).await?;

    let verifier = Verifier::new(Arc::clone(ledger), Arc::clone(store), auditor, VerifierConfig::from_env()?);
    let report = verifier.verify(game_id, Some(&proof)).await;
    for check in &report.checks {
        info!("  {:?}: {} ({})", check.check, if check.passed { "ok" } else { "FAILED" }, check.detail);
    }
    if report.valid() {
        info!("Game {} VERIFIED, audited multiplier {:?}", game_id, report.audited_multiplier);
    } else {
        warn!("Game {} not verified: {:?} {:?}", game_id, report.verdict, report.error);
    }
    Ok(())
}
