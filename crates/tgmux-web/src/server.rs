//! Main web server setup and startup.
//!
//! [`WebServer`] composes five Axum routers — one per fixed port (spec.md
//! §6) — all sharing one [`AppState`], following the teacher's
//! `openintent-web::WebServer` composition but with one listener per port
//! instead of one shared port.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::Method;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use tgmux_protocol::Service;

use crate::admin;
use crate::handlers::{self, create_chat, leave_chat, send_media, send_text};
use crate::state::AppState;

const CREATE_CHAT_PORT: u16 = 5021;
const SEND_TEXT_PORT: u16 = 5022;
const SEND_MEDIA_PORT: u16 = 5023;
const LEAVE_CHAT_PORT: u16 = 5024;
const ADMIN_PORT: u16 = 5099;

pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// One router per fixed service port, each exposing the operation's
    /// POST endpoint plus the shared `/health`, `/stats`, `/reload_cache`
    /// auxiliary routes (spec.md §6).
    fn service_router(&self, service: Service) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods([Method::GET, Method::POST]).allow_headers(Any);
        let operation = Router::new();
        let operation = match service {
            Service::CreateChat => operation.route("/create_chat", post(create_chat::create_chat)),
            Service::SendText => operation.route("/send_text", post(send_text::send_text)),
            Service::SendMedia => operation.route("/send_media", post(send_media::send_media)),
            Service::LeaveChat => operation.route("/leave_chat", post(leave_chat::leave_chat)),
        };
        operation
            .route("/health", get(move |State(state): State<Arc<AppState>>| async move { handlers::health(state, service).await }))
            .route("/stats", get(move |State(state): State<Arc<AppState>>| async move { handlers::stats(state, service).await }))
            .route(
                "/reload_cache",
                post(move |State(state): State<Arc<AppState>>| async move { handlers::reload_cache(state, service).await }),
            )
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    fn admin_router(&self) -> Router {
        admin::router().with_state(Arc::clone(&self.state))
    }

    /// Bind all five listeners and serve them concurrently, returning only
    /// when one of them exits (normally never, until the process is
    /// signalled to shut down).
    pub async fn start(self) -> anyhow::Result<()> {
        let routers = [
            (CREATE_CHAT_PORT, self.service_router(Service::CreateChat)),
            (SEND_TEXT_PORT, self.service_router(Service::SendText)),
            (SEND_MEDIA_PORT, self.service_router(Service::SendMedia)),
            (LEAVE_CHAT_PORT, self.service_router(Service::LeaveChat)),
            (ADMIN_PORT, self.admin_router()),
        ];

        let mut handles = Vec::with_capacity(routers.len());
        for (port, router) in routers {
            let addr = format!("0.0.0.0:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(addr = %addr, "listening");
            handles.push(tokio::spawn(async move { axum::serve(listener, router).await }));
        }

        for handle in handles {
            handle.await??;
        }
        Ok(())
    }
}
