use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::middleware::require_auth;
use parley_api::translate::{TranslationCache, TranslationClient};
use parley_api::{contacts, conversations, messages, translate, users};
use parley_gateway::connection::{self, GatewayContext};
use parley_gateway::dispatcher::Dispatcher;
use parley_gateway::sync::ViewSynchronizer;

#[derive(Clone)]
struct ServerState {
    gateway: GatewayContext,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let translate_url = std::env::var("PARLEY_TRANSLATE_URL")
        .unwrap_or_else(|_| "http://localhost:4020/translate".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let sync = ViewSynchronizer::new(db.clone(), dispatcher.clone());
    let gateway = GatewayContext {
        db: db.clone(),
        dispatcher: dispatcher.clone(),
        sync,
    };

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
        dispatcher,
        translator: TranslationClient::new(translate_url),
        translations: TranslationCache::new(),
    });

    let state = ServerState {
        gateway,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/me", get(users::get_me))
        .route("/me", put(users::update_me))
        .route("/users/{user_id}", get(users::get_user))
        .route("/contacts", get(contacts::list_contacts))
        .route("/contacts", post(contacts::add_contact))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations", post(conversations::open_conversation))
        .route("/conversations/{conversation_id}", get(conversations::get_conversation))
        .route("/conversations/{conversation_id}/messages", get(messages::list_messages))
        .route("/conversations/{conversation_id}/messages", post(messages::send_message))
        .route("/conversations/{conversation_id}/read", post(messages::mark_read))
        .route(
            "/conversations/{conversation_id}/messages/{message_id}",
            delete(messages::delete_message),
        )
        .route(
            "/conversations/{conversation_id}/messages/{message_id}/reactions",
            post(messages::toggle_reaction),
        )
        .route(
            "/conversations/{conversation_id}/messages/{message_id}/forward",
            post(messages::forward_message),
        )
        .route(
            "/conversations/{conversation_id}/messages/{message_id}/translate",
            post(translate::translate_message),
        )
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.gateway, state.jwt_secret)
    })
}
