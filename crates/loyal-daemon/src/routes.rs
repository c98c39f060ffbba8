//! Axum router and all HTTP handlers for loyal-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers translate HTTP to `LoyaltyService` calls and
//! map `ServiceError` variants to status codes; nothing else happens here.
//!
//! Authentication is done upstream. The authenticated user id arrives in the
//! `X-User-Id` header; a request without a usable one gets 401.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use loyal_ledger::{ServiceError, SubmitResult};
use loyal_schemas::{Points, UserId};
use tracing::error;

use crate::{
    api_types::{
        BalanceResponse, ErrorResponse, HealthResponse, OrderResponse, WithdrawRequest,
        WithdrawalResponse,
    },
    state::AppState,
};

pub const USER_ID_HEADER: &str = "x-user-id";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (tracing, compression) are **not** applied here;
/// `main.rs` attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/api/user/orders", post(submit_order).get(list_orders))
        .route("/api/user/balance", get(balance))
        .route("/api/user/balance/withdraw", post(withdraw))
        .route("/api/user/withdrawals", get(list_withdrawals))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn error_body(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: msg.into() })).into_response()
}

fn caller(headers: &HeaderMap) -> Result<UserId, Response> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .map(UserId)
        .ok_or_else(|| error_body(StatusCode::UNAUTHORIZED, "missing or invalid user id"))
}

fn service_error(e: ServiceError) -> Response {
    let status = match &e {
        ServiceError::InvalidFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServiceError::Conflict => StatusCode::CONFLICT,
        ServiceError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        ServiceError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        ServiceError::Storage(inner) => {
            error!(error = %format!("{inner:#}"), "storage failure");
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };
    error_body(status, e.to_string())
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

/// 503 when storage is unreachable or unmigrated.
pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let ok = match st.service.store().status().await {
        Ok(s) => s.ok && s.has_orders_table,
        Err(e) => {
            error!(error = %format!("{e:#}"), "health: storage check failed");
            false
        }
    };
    let code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(HealthResponse {
            ok,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /api/user/orders
// ---------------------------------------------------------------------------

/// Plain-text body holding the order number.
///
/// 202 for a new order, 200 if this user already uploaded it.
pub(crate) async fn submit_order(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let user = match caller(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if body.trim().is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "empty request body");
    }

    match st.service.submit_order(user, &body).await {
        Ok(SubmitResult::Accepted(order)) => {
            (StatusCode::ACCEPTED, Json(OrderResponse::from(order))).into_response()
        }
        Ok(SubmitResult::AlreadyUploaded(order)) => {
            (StatusCode::OK, Json(OrderResponse::from(order))).into_response()
        }
        Err(e) => service_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /api/user/orders
// ---------------------------------------------------------------------------

pub(crate) async fn list_orders(State(st): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let user = match caller(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match st.service.orders(user).await {
        Ok(orders) if orders.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(orders) => {
            let body: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => service_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /api/user/balance
// ---------------------------------------------------------------------------

pub(crate) async fn balance(State(st): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let user = match caller(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match st.service.balance(user).await {
        Ok(b) => (StatusCode::OK, Json(BalanceResponse::from(b))).into_response(),
        Err(e) => service_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /api/user/balance/withdraw
// ---------------------------------------------------------------------------

pub(crate) async fn withdraw(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<WithdrawRequest>, JsonRejection>,
) -> Response {
    let user = match caller(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rej) => return error_body(StatusCode::BAD_REQUEST, rej.body_text()),
    };
    let sum = match Points::from_f64(req.sum) {
        Ok(s) => s,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, format!("invalid sum: {e}")),
    };

    match st.service.withdraw(user, &req.order, sum).await {
        Ok(w) => (StatusCode::OK, Json(WithdrawalResponse::from(w))).into_response(),
        Err(e) => service_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /api/user/withdrawals
// ---------------------------------------------------------------------------

pub(crate) async fn list_withdrawals(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let user = match caller(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match st.service.withdrawals(user).await {
        Ok(list) if list.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(list) => {
            let body: Vec<WithdrawalResponse> =
                list.into_iter().map(WithdrawalResponse::from).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => service_error(e),
    }
}
