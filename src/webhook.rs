//! Inbound webhook: answers subscription handshakes and hands notifications
//! to the notification queue. No processing happens inside the request, so
//! the library's response deadline is always met.
use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::db::Pool;
use crate::model::{NotificationBatch, QueueName};
use crate::queue;

pub fn router(pool: Pool) -> Router {
    Router::new()
        .route("/api/webhook", get(handle_webhook).post(handle_webhook))
        .route("/health", get(|| async { "OK" }))
        .with_state(pool)
}

/// Serve the webhook until ctrl-c.
pub async fn serve(bind: &str, pool: Pool) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(pool))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}

fn validation_token(params: &HashMap<String, String>) -> Option<&str> {
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("validationtoken"))
        .map(|(_, v)| v.as_str())
}

async fn handle_webhook(
    State(pool): State<Pool>,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    if let Some(token) = validation_token(&params) {
        info!(token, "validation token received");
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            token.to_string(),
        )
            .into_response();
    }

    let batch: NotificationBatch = match serde_json::from_str(&body) {
        Ok(batch) => batch,
        Err(err) => {
            warn!(%err, "rejecting malformed notification payload");
            return (
                StatusCode::BAD_REQUEST,
                format!("invalid notification payload: {}", err),
            )
                .into_response();
        }
    };

    for notification in &batch.value {
        if let Err(err) = queue::enqueue(&pool, QueueName::Notifications, notification).await {
            error!(?err, resource = %notification.resource, "failed to queue notification");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    info!(count = batch.value.len(), "queued notifications");
    StatusCode::OK.into_response()
}
