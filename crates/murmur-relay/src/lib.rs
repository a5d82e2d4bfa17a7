#![forbid(unsafe_code)]

//! Murmur Relay - routes end-to-end encrypted envelopes between principals.
//!
//! The relay:
//! 1. Binds each connection to a unique name and its published public key
//! 2. Publishes those keys over HTTP and pushes the active list to everyone
//! 3. Forwards envelopes it cannot read (E2E encryption between principals)

pub mod config;
pub mod directory;
pub mod error;
pub mod http;
pub mod router;
pub mod ws;

use axum::{extract::FromRef, http::Method, routing::get, Router as HttpRouter};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{ConnectionSettings, RelayConfig};
pub use directory::{ConnectionHandle, Directory, Principal};
pub use error::{IdentityError, RouteError};
pub use router::Router;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub directory: Directory,
    pub router: Router,
    pub settings: ConnectionSettings,
}

impl AppState {
    pub fn new(settings: ConnectionSettings) -> Self {
        let directory = Directory::new();
        let router = Router::new(directory.clone());
        Self {
            directory,
            router,
            settings,
        }
    }
}

impl FromRef<AppState> for Directory {
    fn from_ref(state: &AppState) -> Self {
        state.directory.clone()
    }
}

impl FromRef<AppState> for Router {
    fn from_ref(state: &AppState) -> Self {
        state.router.clone()
    }
}

/// HTTP + WebSocket routes. Serve with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn app(state: AppState) -> HttpRouter {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    HttpRouter::new()
        .route("/", get(|| async { "Murmur Relay Online" }))
        .route("/health", get(http::health))
        .route("/principals", get(http::principals))
        .route("/public-key/:name", get(http::public_key))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
