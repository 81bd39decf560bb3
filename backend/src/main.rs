use axum::routing::{get, post};
use axum::{middleware, Router};
use diesel::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod conversation;
mod db;
mod error;
mod events;
mod listing;
mod message;
mod models;
mod moderation;
mod negotiation;
mod offer;
mod realtime;
mod schema;

#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub hub: Arc<realtime::Hub>,
    pub events: broadcast::Sender<events::DomainEvent>,
}

async fn health() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::AppConfig::load()?;

    let mut conn = diesel::pg::PgConnection::establish(&config.database_url)
        .map_err(|e| format!("failed to connect to database: {e}"))?;
    let probe: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("1"))
        .get_result(&mut conn)?;
    info!("database probe result: {probe}");

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let state = AppState {
        config,
        hub: Arc::new(realtime::Hub::new()),
        events: events::channel(),
    };

    let protected_routes = Router::new()
        .route("/listings", post(listing::create_listing).get(listing::list_listings))
        .route(
            "/conversations",
            get(conversation::list_conversations).post(conversation::start_conversation),
        )
        .route("/conversations/:id", get(conversation::get_conversation))
        .route(
            "/conversations/:id/messages",
            get(message::list_messages).post(message::post_message),
        )
        .route("/conversations/:id/read", post(conversation::mark_read))
        .route("/conversations/:id/archive", post(conversation::archive))
        .route(
            "/conversations/:id/offers",
            get(offer::list_offers).post(offer::create_offer),
        )
        .route("/offers/:id/respond", post(offer::respond_offer))
        .route(
            "/blocks/:user_id",
            post(moderation::block_user).delete(moderation::unblock_user),
        )
        .route(
            "/conversations/:id/report/:user_id",
            post(moderation::report_user),
        )
        .route("/chat/stats", get(conversation::chat_stats))
        .layer(middleware::from_fn_with_state(state.clone(), auth::authenticate));

    let app = Router::new()
        .route("/health", get(health))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/ws/conversations/:id", get(realtime::ws_handler))
        .merge(protected_routes)
        .with_state(state);

    info!("starting server on {addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app.into_make_service()).await?;

    Ok(())
}
