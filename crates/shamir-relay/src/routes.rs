//! HTTP surface: the four operations `wallet-flows`'s
//! `VrfWorkerClient::unlock_with_shamir` drives a client through.

use crate::keyid::current_key_id;
use crate::shamir::{decode_biguint_b64u, encode_biguint_b64u, ServerLockKeys, ShamirGroup};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub struct AppState {
    pub group: ShamirGroup,
    pub keys: ServerLockKeys,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/shamir/server-keypair", post(generate_server_keypair))
        .route("/v1/shamir/apply-lock", post(apply_server_lock))
        .route("/v1/shamir/remove-lock", post(remove_server_lock))
        .route("/v1/shamir/key-id", get(get_current_key_id))
        .with_state(state)
}

#[derive(Debug, Error)]
enum RelayError {
    #[error("invalid base64url encoding in request field")]
    BadEncoding,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn decode_or_err(s: &str) -> Result<num_bigint::BigUint, RelayError> {
    decode_biguint_b64u(s).map_err(|_| RelayError::BadEncoding)
}

#[derive(Serialize)]
struct ServerKeypairResponse {
    e_s_b64u: String,
    d_s_b64u: String,
    key_id: String,
}

/// `POST /v1/shamir/server-keypair` — `generateServerKeypair()`. Returns
/// the keypair configured at startup; this relay does not rotate keys
/// on its own (rotation is an operator action: restart with new
/// `--encryption-exponent-b64u`/`--decryption-exponent-b64u`).
async fn generate_server_keypair(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let e_s_b64u = encode_biguint_b64u(&state.keys.e_s);
    let d_s_b64u = encode_biguint_b64u(&state.keys.d_s);
    let key_id = current_key_id(&e_s_b64u);
    Json(ServerKeypairResponse { e_s_b64u, d_s_b64u, key_id })
}

#[derive(Deserialize)]
struct ApplyLockRequest {
    kek_c_b64u: String,
}

#[derive(Serialize, Deserialize)]
struct ApplyLockResponse {
    kek_cs_b64u: String,
    key_id: String,
}

/// `POST /v1/shamir/apply-lock` — `applyServerLock({kek_c_b64u})`.
async fn apply_server_lock(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ApplyLockRequest>,
) -> Result<Json<ApplyLockResponse>, RelayError> {
    let kek_c = decode_or_err(&req.kek_c_b64u)?;
    let kek_cs = state.group.apply_lock(&kek_c, &state.keys.e_s);
    let key_id = current_key_id(&encode_biguint_b64u(&state.keys.e_s));
    Ok(Json(ApplyLockResponse { kek_cs_b64u: encode_biguint_b64u(&kek_cs), key_id }))
}

#[derive(Deserialize)]
struct RemoveLockRequest {
    kek_cs_b64u: String,
}

#[derive(Serialize, Deserialize)]
struct RemoveLockResponse {
    kek_c_b64u: String,
}

/// `POST /v1/shamir/remove-lock` — `removeServerLock({kek_cs_b64u})`.
async fn remove_server_lock(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RemoveLockRequest>,
) -> Result<Json<RemoveLockResponse>, RelayError> {
    let kek_cs = decode_or_err(&req.kek_cs_b64u)?;
    let kek_c = state.group.remove_lock(&kek_cs, &state.keys.d_s);
    Ok(Json(RemoveLockResponse { kek_c_b64u: encode_biguint_b64u(&kek_c) }))
}

#[derive(Serialize)]
struct KeyIdResponse {
    key_id: String,
}

/// `GET /v1/shamir/key-id` — `getCurrentKeyId()`.
async fn get_current_key_id(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let key_id = current_key_id(&encode_biguint_b64u(&state.keys.e_s));
    Json(KeyIdResponse { key_id })
}
