use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use timpal_core::constants::PALS_PER_TMPL;
use timpal_core::transaction::Transaction;
use timpal_core::types::Address;
use tracing::warn;

use crate::client::{NodeClient, SendFailure};
use crate::types::{AccountInfo, BlocksRange, ErrorBody, HealthInfo, SendRequest, SubmitResponse};

type Failure = (StatusCode, Json<ErrorBody>);

fn bad_request(message: &str) -> Failure {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: message.to_string() }))
}

/// All internals collapse to one opaque 500.
fn unavailable() -> Failure {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody { error: "node unavailable, try again".to_string() }),
    )
}

/// `POST /submit_transaction`: accept a pre-signed transaction.
pub async fn submit_transaction(
    State(client): State<NodeClient>,
    Json(tx): Json<Transaction>,
) -> Result<Json<SubmitResponse>, Failure> {
    match client.submit_transaction(tx).await.map_err(|_| unavailable())? {
        Ok(tx_hash) => Ok(Json(SubmitResponse { status: "success", tx_hash: tx_hash.0 })),
        Err(reason) => {
            warn!(reason = %reason, "transaction rejected over HTTP");
            Err(bad_request("Transaction rejected"))
        }
    }
}

/// `POST /send`: build, sign and submit a transfer from the local wallet.
///
/// Validates address shape and amount here; the PIN check, balance check
/// and nonce selection happen in the node task, which owns the wallet.
/// Every client-facing error is sanitized.
pub async fn send(
    State(client): State<NodeClient>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SubmitResponse>, Failure> {
    if !Address::is_well_formed(&req.sender) {
        return Err(bad_request("Invalid sender address format"));
    }
    if !Address::is_well_formed(&req.recipient) {
        return Err(bad_request("Invalid recipient address format"));
    }
    if !req.amount_tmpl.is_finite() || req.amount_tmpl <= 0.0 {
        return Err(bad_request("Amount must be greater than 0"));
    }
    let amount_pals = (req.amount_tmpl * PALS_PER_TMPL as f64) as u64;
    if amount_pals == 0 {
        return Err(bad_request("Amount must be greater than 0"));
    }

    let outcome = client
        .send_transfer(Address(req.sender), Address(req.recipient), amount_pals, req.pin)
        .await
        .map_err(|_| unavailable())?;

    match outcome {
        Ok(tx_hash) => Ok(Json(SubmitResponse { status: "success", tx_hash: tx_hash.0 })),
        Err(SendFailure::WrongPin) => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody { error: "Invalid PIN or wallet decryption failed".to_string() }),
        )),
        Err(SendFailure::WalletMismatch) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody { error: "Wallet not found for this address".to_string() }),
        )),
        Err(SendFailure::InsufficientBalance) => {
            Err(bad_request("Insufficient balance for amount plus fee"))
        }
        Err(SendFailure::Rejected) => Err(bad_request("Transaction rejected by mempool")),
    }
}

#[derive(Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub end: u64,
}

/// `GET /api/blocks/range?start&end`: batch block sync, capped at 100
/// blocks per request.
pub async fn blocks_range(
    State(client): State<NodeClient>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<BlocksRange>, Failure> {
    if range.end < range.start {
        return Err(bad_request("end must be >= start"));
    }
    if range.end - range.start > 100 {
        return Err(bad_request("Max 100 blocks per request"));
    }
    let result = client
        .blocks_range(range.start, range.end)
        .await
        .map_err(|_| unavailable())?;
    Ok(Json(result))
}

/// `GET /api/health`.
pub async fn health(State(client): State<NodeClient>) -> Result<Json<HealthInfo>, Failure> {
    client.health().await.map(Json).map_err(|_| unavailable())
}

/// `GET /api/account/{address}`.
pub async fn account(
    State(client): State<NodeClient>,
    Path(address): Path<String>,
) -> Result<Json<AccountInfo>, Failure> {
    if !Address::is_well_formed(&address) {
        return Err(bad_request("Invalid address format"));
    }
    client
        .account_info(Address(address))
        .await
        .map(Json)
        .map_err(|_| unavailable())
}
