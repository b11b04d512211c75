//! Moda Elite - fashion storefront with affiliate sales tracking

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use validator::Validate;

use moda_elite::checkout::{CheckoutError, CheckoutOrchestrator, CheckoutOutcome};
use moda_elite::domain::aggregates::{Affiliate, Cart, CartError, CartLine, Commission, Order, Product, ShippingAddress};
use moda_elite::domain::value_objects::VariantKey;
use moda_elite::events::StorefrontEvent;
use moda_elite::referral::ReferralTracker;
use moda_elite::store::{PgStore, Store, StoreError};

/// Per-browsing-session state. Both pieces die with the session: the cache
/// evicts idle entries, and the inner mutex serializes the session's own
/// requests.
#[derive(Default)]
struct Session {
    cart: Cart,
    tracker: ReferralTracker,
}

type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

const SESSION_IDLE: Duration = Duration::from_secs(30 * 60);
const MAX_SESSIONS: u64 = 100_000;

#[derive(Clone)]
struct AppState {
    store: PgStore,
    nats: Option<async_nats::Client>,
    sessions: moka::future::Cache<String, SessionHandle>,
}

impl AppState {
    async fn session(&self, id: &str) -> SessionHandle {
        self.sessions
            .get_with(id.to_string(), async { SessionHandle::default() })
            .await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&std::env::var("DATABASE_URL")?)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match std::env::var("NATS_URL") {
        Ok(url) => async_nats::connect(&url).await.ok(),
        Err(_) => None,
    };
    let state = AppState {
        store: PgStore::new(db),
        nats,
        sessions: moka::future::Cache::builder()
            .max_capacity(MAX_SESSIONS)
            .time_to_idle(SESSION_IDLE)
            .build(),
    };

    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "moda-elite"})) }))
        .route("/api/v1/products", get(list_products))
        .route("/api/v1/products/:id", get(get_product))
        .route("/api/v1/cart/:session", get(get_cart).delete(clear_cart))
        .route("/api/v1/cart/:session/items", post(add_cart_item).delete(remove_cart_item))
        .route("/api/v1/track/:session", get(track_referral))
        .route("/api/v1/checkout/:session", post(checkout))
        .route("/api/v1/orders", get(list_orders))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/affiliates/:code", get(get_affiliate))
        .route("/api/v1/affiliates/:id/commissions", get(list_affiliate_commissions))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    tracing::info!("moda-elite listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}

type ApiError = (StatusCode, String);

fn store_error(e: StoreError) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn cart_error(e: CartError) -> ApiError {
    match e {
        CartError::InvalidQuantity => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        CartError::OutOfStock { .. } => (StatusCode::CONFLICT, e.to_string()),
    }
}

/// Identity comes from the authentication layer in front of this service.
fn user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or((StatusCode::UNAUTHORIZED, "login required".to_string()))
}

fn checkout_error(e: CheckoutError) -> ApiError {
    let status = match &e {
        CheckoutError::InvalidCheckout(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CheckoutError::InsufficientStock { .. } => StatusCode::CONFLICT,
        CheckoutError::InvalidRate(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CheckoutError::PersistenceFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, e.to_string())
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListParams {
    page: Option<u32>,
    per_page: Option<u32>,
}

async fn list_products(
    State(s): State<AppState>,
    Query(p): Query<ListParams>,
) -> Result<Json<Vec<Product>>, ApiError> {
    let page = p.page.unwrap_or(1).max(1);
    let per_page = p.per_page.unwrap_or(20).min(100);
    let products = s
        .store
        .list_products(per_page as i64, ((page - 1) * per_page) as i64)
        .await
        .map_err(store_error)?;
    Ok(Json(products))
}

async fn get_product(
    State(s): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    s.store
        .get_product(&id)
        .await
        .map_err(store_error)?
        .filter(|p| p.active)
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "product not found".to_string()))
}

// ============================================================================
// Cart
// ============================================================================

#[derive(Debug, Serialize)]
struct CartView {
    lines: Vec<CartLine>,
    total_items: u64,
    total_price: Decimal,
}

impl CartView {
    fn of(cart: &Cart) -> Self {
        Self {
            lines: cart.lines().to_vec(),
            total_items: cart.total_items(),
            total_price: cart.total_price().amount(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddItemRequest {
    product_id: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    color: String,
    #[serde(default = "one")]
    quantity: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct RemoveItemRequest {
    product_id: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    color: String,
}

async fn get_cart(State(s): State<AppState>, Path(session): Path<String>) -> Json<CartView> {
    let handle = s.session(&session).await;
    let guard = handle.lock().await;
    Json(CartView::of(&guard.cart))
}

async fn add_cart_item(
    State(s): State<AppState>,
    Path(session): Path<String>,
    Json(r): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<CartView>), ApiError> {
    let product = s
        .store
        .get_product(&r.product_id)
        .await
        .map_err(store_error)?
        .filter(|p| p.active)
        .ok_or((StatusCode::NOT_FOUND, "product not found".to_string()))?;
    let handle = s.session(&session).await;
    let mut guard = handle.lock().await;
    guard
        .cart
        .add_item(&product, &r.size, &r.color, r.quantity)
        .map_err(cart_error)?;
    Ok((StatusCode::CREATED, Json(CartView::of(&guard.cart))))
}

async fn remove_cart_item(
    State(s): State<AppState>,
    Path(session): Path<String>,
    Json(r): Json<RemoveItemRequest>,
) -> Json<CartView> {
    let handle = s.session(&session).await;
    let mut guard = handle.lock().await;
    guard
        .cart
        .remove_item(&VariantKey::new(r.product_id, r.size, r.color));
    Json(CartView::of(&guard.cart))
}

async fn clear_cart(State(s): State<AppState>, Path(session): Path<String>) -> StatusCode {
    let handle = s.session(&session).await;
    handle.lock().await.cart.clear();
    StatusCode::NO_CONTENT
}

// ============================================================================
// Referral tracking
// ============================================================================

async fn track_referral(
    State(s): State<AppState>,
    Path(session): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let handle = s.session(&session).await;
    let capture = {
        let mut guard = handle.lock().await;
        guard.tracker.capture_from_link(&params)
    };
    match capture {
        Some(cap) => {
            if cap.creditable {
                s.store.record_click(&cap.code).await.map_err(store_error)?;
            }
            Ok(Json(serde_json::json!({"captured": true, "code": cap.code})))
        }
        None => Ok(Json(serde_json::json!({"captured": false}))),
    }
}

// ============================================================================
// Checkout
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
struct CheckoutRequest {
    #[validate]
    address: AddressInput,
}

#[derive(Debug, Deserialize, Validate)]
struct AddressInput {
    #[validate(length(min = 1))]
    street: String,
    number: Option<String>,
    #[validate(length(min = 1))]
    city: String,
    #[validate(length(min = 1))]
    zip: String,
}

impl From<AddressInput> for ShippingAddress {
    fn from(a: AddressInput) -> Self {
        ShippingAddress {
            street: a.street,
            number: a.number,
            city: a.city,
            zip: a.zip,
        }
    }
}

async fn checkout(
    State(s): State<AppState>,
    Path(session): Path<String>,
    headers: HeaderMap,
    Json(r): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let user_id = user_id(&headers)?;
    r.validate()
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let handle = s.session(&session).await;
    let mut guard = handle.lock().await;
    let Session { cart, tracker } = &mut *guard;
    let outcome = CheckoutOrchestrator::new(&s.store)
        .checkout(cart, tracker, &user_id, r.address.into())
        .await
        .map_err(checkout_error)?;

    publish_events(&s, &outcome).await;
    Ok((StatusCode::CREATED, Json(outcome.order)))
}

async fn publish_events(s: &AppState, outcome: &CheckoutOutcome) {
    let Some(nats) = &s.nats else { return };
    for event in StorefrontEvent::from_outcome(outcome) {
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event");
                continue;
            }
        };
        if let Err(e) = nats.publish(event.subject(), payload.into()).await {
            tracing::warn!(subject = event.subject(), error = %e, "failed to publish event");
        }
    }
}

// ============================================================================
// Order history
// ============================================================================

async fn list_orders(
    State(s): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Order>>, ApiError> {
    let user_id = user_id(&headers)?;
    let orders = s.store.list_orders_for_user(&user_id).await.map_err(store_error)?;
    Ok(Json(orders))
}

async fn get_order(
    State(s): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    s.store
        .get_order(&id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "order not found".to_string()))
}

// ============================================================================
// Affiliate dashboard reads
// ============================================================================

async fn get_affiliate(
    State(s): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Affiliate>, ApiError> {
    s.store
        .get_affiliate_by_code(&code)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "affiliate not found".to_string()))
}

async fn list_affiliate_commissions(
    State(s): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Commission>>, ApiError> {
    let commissions = s.store.list_commissions_for(&id).await.map_err(store_error)?;
    Ok(Json(commissions))
}
