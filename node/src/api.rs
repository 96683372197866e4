//! # REST API
//!
//! Builds the axum router that exposes the ledger over HTTP. All endpoints
//! share application state through axum's `State` extractor.
//!
//! Caller identity is established upstream: the authentication gateway
//! verifies the customer's session and forwards the numeric user id in the
//! `X-User-Id` header. Routes marked "user" reject requests without it.
//!
//! ## Endpoints
//!
//! | Method | Path                        | Auth | Description                      |
//! |--------|-----------------------------|------|----------------------------------|
//! | GET    | `/health`                   | -    | Liveness check                   |
//! | GET    | `/v1/me/accounts`           | user | Caller's accounts                |
//! | POST   | `/v1/accounts/open`         | user | Open a new account               |
//! | POST   | `/v1/accounts/block`        | user | Block one of the caller's accounts |
//! | GET    | `/v1/accounts/history`      | user | Page of an account's transfers   |
//! | POST   | `/v1/transactions`          | user | Transfer between accounts        |
//! | POST   | `/v1/atm/supplement`        | ATM  | Bank loads cash into an ATM      |
//! | POST   | `/v1/atm/withdrawal`        | ATM  | Bank collects cash from an ATM   |
//! | POST   | `/v1/atm/user/supplement`   | ATM  | Customer cash deposit            |
//! | POST   | `/v1/atm/user/withdrawal`   | both | Customer cash withdrawal         |

use std::future::Future;
use std::time::{Duration, Instant};

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequestParts, Query, State,
    },
    http::{request::Parts, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use bank_ledger::config::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT, SYSTEM_USER_ID};
use bank_ledger::{
    Account, AccountId, CashReceipt, ErrorKind, LedgerError, LedgerResult, RequestContext,
    Requester, SledLedger, StoreError, Transaction, TransactionEngine, UserId,
};

use crate::metrics::SharedMetrics;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone. The engine and metrics are behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub engine: TransactionEngine<SledLedger>,
    pub metrics: SharedMetrics,
    /// Deadline applied to every ledger call made by a handler.
    pub request_timeout: Duration,
    pub version: String,
}

impl AppState {
    fn context(&self) -> RequestContext {
        RequestContext::with_timeout(self.request_timeout)
    }
}

/// Builds the router with CORS and request tracing layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/me/accounts", get(user_accounts_handler))
        .route("/v1/accounts/open", post(open_account_handler))
        .route("/v1/accounts/block", post(block_account_handler))
        .route("/v1/accounts/history", get(account_history_handler))
        .route("/v1/transactions", post(transaction_handler))
        .route("/v1/atm/supplement", post(atm_supplement_handler))
        .route("/v1/atm/withdrawal", post(atm_withdrawal_handler))
        .route("/v1/atm/user/supplement", post(atm_user_supplement_handler))
        .route("/v1/atm/user/withdrawal", post(atm_user_withdrawal_handler))
        .fallback(not_found_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

/// The authenticated customer making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

impl Caller {
    fn requester(self) -> Requester {
        Requester::User(self.0)
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::unauthenticated("missing X-User-Id header"))?;
        let user_id = raw
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<UserId>().ok())
            .ok_or_else(|| ApiError::unauthenticated("malformed X-User-Id header"))?;
        // The bank's own identity is never a customer.
        if user_id == SYSTEM_USER_ID {
            return Err(ApiError::unauthenticated("malformed X-User-Id header"));
        }
        Ok(Caller(user_id))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error body returned by every endpoint on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. `not_enough_money`.
    pub error: String,
    /// Human-readable message, safe to show to the customer.
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: ErrorKind::InvalidRequest.as_str(),
            message: message.into(),
        }
    }

    fn unauthenticated(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthenticated",
            message: message.into(),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BlockedAccount | ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotEnoughMoney => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::AccessDenied => StatusCode::FORBIDDEN,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidAmount | ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Storage => match &err {
                LedgerError::Storage(StoreError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        if kind == ErrorKind::Storage {
            tracing::error!(error = %err, "ledger operation failed");
        }
        Self {
            status,
            code: kind.as_str(),
            message: err.user_message(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Awaits a ledger call, recording its latency and any rejection.
async fn instrumented<T, F>(state: &AppState, operation: &'static str, call: F) -> ApiResult<T>
where
    F: Future<Output = LedgerResult<T>>,
{
    let started = Instant::now();
    let result = call.await;
    state
        .metrics
        .observe(operation, started.elapsed(), result.as_ref().err());
    result.map_err(ApiError::from)
}

/// Wire amounts are signed; only strictly positive values reach the ledger.
fn positive_amount(amount_cents: i64) -> ApiResult<u64> {
    match u64::try_from(amount_cents) {
        Ok(cents) if cents > 0 => Ok(cents),
        _ => Err(LedgerError::InvalidAmount.into()),
    }
}

fn non_negative(name: &str, value: i64) -> ApiResult<usize> {
    usize::try_from(value).map_err(|_| ApiError::bad_request(format!("{name} must not be negative")))
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub id: AccountId,
    pub balance_cents: u64,
    pub status: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            balance_cents: account.balance_cents,
            status: account.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountsResponse {
    pub items: Vec<AccountResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountData {
    pub account_id: AccountId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub account_id: AccountId,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub id: u64,
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub status: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    pub amount_cents: u64,
    pub description: String,
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id,
            sender_id: tx.sender_id,
            receiver_id: tx.receiver_id,
            status: tx.status.as_str().to_string(),
            created_at: tx.created_at.to_rfc3339(),
            amount_cents: tx.amount_cents,
            description: tx.description.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub items: Vec<TransactionResponse>,
    /// Total number of transactions touching the account, across all pages.
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionData {
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub amount_cents: i64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtmSupplementData {
    pub login: String,
    pub password: String,
    pub amount_cents: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtmUserData {
    pub login: String,
    pub password: String,
    pub amount_cents: i64,
    pub account_id: AccountId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashReceiptResponse {
    pub atm_id: u64,
    pub direction: String,
    pub amount_cents: u64,
    /// Cash physically held by the ATM after the operation.
    pub atm_cash_cents: i64,
    pub vault_balance_cents: u64,
    pub transaction: Option<TransactionResponse>,
}

impl From<&CashReceipt> for CashReceiptResponse {
    fn from(receipt: &CashReceipt) -> Self {
        Self {
            atm_id: receipt.atm.id,
            direction: receipt.operation.direction.as_str().to_string(),
            amount_cents: receipt.operation.amount_cents,
            atm_cash_cents: receipt.atm.cash_cents,
            vault_balance_cents: receipt.vault.balance_cents,
            transaction: receipt.transaction.as_ref().map(TransactionResponse::from),
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: liveness check. Does not touch the ledger.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": state.version }))
}

async fn not_found_handler() -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        code: ErrorKind::NotFound.as_str(),
        message: "route not found".into(),
    }
}

async fn user_accounts_handler(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Json<AccountsResponse>> {
    let ctx = state.context();
    let accounts = instrumented(
        &state,
        "list_accounts",
        state.engine.list_accounts(&ctx, caller.0),
    )
    .await?;
    Ok(Json(AccountsResponse {
        items: accounts.iter().map(AccountResponse::from).collect(),
    }))
}

async fn open_account_handler(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<(StatusCode, Json<AccountResponse>)> {
    let ctx = state.context();
    let account = instrumented(
        &state,
        "open_account",
        state.engine.open_account(&ctx, caller.0),
    )
    .await?;
    state.metrics.accounts_opened_total.inc();
    Ok((StatusCode::CREATED, Json(AccountResponse::from(&account))))
}

async fn block_account_handler(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<AccountData>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(data) = payload?;
    let ctx = state.context();
    instrumented(
        &state,
        "block_account",
        state
            .engine
            .block_account(&ctx, data.account_id, caller.requester()),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn account_history_handler(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<HistoryResponse>> {
    let Query(query) = query?;
    let limit = match query.limit {
        Some(limit) => non_negative("limit", limit)?,
        None => DEFAULT_HISTORY_LIMIT,
    };
    let limit = if limit == 0 {
        DEFAULT_HISTORY_LIMIT
    } else {
        limit.min(MAX_HISTORY_LIMIT)
    };
    let offset = non_negative("offset", query.offset.unwrap_or(0))?;

    let ctx = state.context();
    let page = instrumented(
        &state,
        "account_history",
        state
            .engine
            .account_history(&ctx, query.account_id, caller.requester(), limit, offset),
    )
    .await?;
    Ok(Json(HistoryResponse {
        items: page.items.iter().map(TransactionResponse::from).collect(),
        total: page.total,
    }))
}

async fn transaction_handler(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<TransactionData>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TransactionResponse>)> {
    let Json(data) = payload?;
    let amount_cents = positive_amount(data.amount_cents)?;
    let ctx = state.context();
    let tx = instrumented(
        &state,
        "transfer",
        state.engine.make_transaction(
            &ctx,
            data.sender_id,
            data.receiver_id,
            amount_cents,
            caller.requester(),
            &data.description,
        ),
    )
    .await?;
    state.metrics.transfers_total.inc();
    Ok((StatusCode::CREATED, Json(TransactionResponse::from(&tx))))
}

async fn atm_supplement_handler(
    State(state): State<AppState>,
    payload: Result<Json<AtmSupplementData>, JsonRejection>,
) -> ApiResult<Json<CashReceiptResponse>> {
    let Json(data) = payload?;
    let amount_cents = positive_amount(data.amount_cents)?;
    let ctx = state.context();
    let receipt = instrumented(
        &state,
        "atm_supplement",
        state
            .engine
            .atm_supplement(&ctx, &data.login, &data.password, amount_cents),
    )
    .await?;
    Ok(Json(cash_response(&state, &receipt)))
}

async fn atm_withdrawal_handler(
    State(state): State<AppState>,
    payload: Result<Json<AtmSupplementData>, JsonRejection>,
) -> ApiResult<Json<CashReceiptResponse>> {
    let Json(data) = payload?;
    let amount_cents = positive_amount(data.amount_cents)?;
    let ctx = state.context();
    let receipt = instrumented(
        &state,
        "atm_withdrawal",
        state
            .engine
            .atm_withdrawal(&ctx, &data.login, &data.password, amount_cents),
    )
    .await?;
    Ok(Json(cash_response(&state, &receipt)))
}

/// Customer cash deposit. The ATM authenticates itself; a caller header is
/// optional and only recorded.
async fn atm_user_supplement_handler(
    State(state): State<AppState>,
    caller: Option<Caller>,
    payload: Result<Json<AtmUserData>, JsonRejection>,
) -> ApiResult<Json<CashReceiptResponse>> {
    let Json(data) = payload?;
    let amount_cents = positive_amount(data.amount_cents)?;
    let requester = caller.map_or(Requester::System, Caller::requester);
    let ctx = state.context();
    let receipt = instrumented(
        &state,
        "atm_user_supplement",
        state.engine.atm_user_supplement(
            &ctx,
            &data.login,
            &data.password,
            amount_cents,
            data.account_id,
            requester,
        ),
    )
    .await?;
    Ok(Json(cash_response(&state, &receipt)))
}

/// Customer cash withdrawal. Needs both the ATM credentials and the
/// customer's identity, since money leaves the customer's account.
async fn atm_user_withdrawal_handler(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<AtmUserData>, JsonRejection>,
) -> ApiResult<Json<CashReceiptResponse>> {
    let Json(data) = payload?;
    let amount_cents = positive_amount(data.amount_cents)?;
    let ctx = state.context();
    let receipt = instrumented(
        &state,
        "atm_user_withdrawal",
        state.engine.atm_user_withdrawal(
            &ctx,
            &data.login,
            &data.password,
            amount_cents,
            data.account_id,
            caller.requester(),
        ),
    )
    .await?;
    Ok(Json(cash_response(&state, &receipt)))
}

fn cash_response(state: &AppState, receipt: &CashReceipt) -> CashReceiptResponse {
    let customer = receipt.operation.user_account_id.is_some();
    state
        .metrics
        .atm_operations_total
        .with_label_values(&[
            receipt.operation.direction.as_str(),
            if customer { "true" } else { "false" },
        ])
        .inc();
    CashReceiptResponse::from(receipt)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
