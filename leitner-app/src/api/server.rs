use axum::{
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::routes::{
    answer_card, card_tags, create_card, deck_tags, edit_card, list_decks, put_card_tags,
};
use crate::cli::commands::App;

pub fn router(app: App) -> Router {
    Router::new()
        .route("/decks", get(list_decks))
        .route("/decks/:id/tags", get(deck_tags))
        .route("/cards", post(create_card))
        .route("/cards/:id", axum::routing::patch(edit_card))
        .route("/cards/:id/tags", get(card_tags).put(put_card_tags))
        .route("/cards/:id/answer", post(answer_card))
        .with_state(Arc::new(app))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(app: App, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "api listening");
    axum::serve(listener, router(app).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, StoreConfig};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use leitner_core::{repo::memory::MemoryRepo, Repository, SyncOptions, SyncPhase};
    use leitner_core::repo::memory::Fault;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(repo: Arc<MemoryRepo>) -> App {
        let cfg = AppConfig {
            store: StoreConfig::Memory,
            sync: SyncOptions::default(),
        };
        App::new(repo, &cfg)
    }

    async fn call(router: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let req = match body {
            Some(b) => req.body(Body::from(b.to_string())).unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = router.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn create_then_replace_tags_over_http() {
        let repo = Arc::new(MemoryRepo::new());
        let deck = repo.create_deck("Spanish").await.unwrap();
        repo.create_box("Daily", 1).await.unwrap();
        let r = router(app(repo.clone()));

        let (status, card) = call(
            r.clone(),
            "POST",
            "/cards",
            Some(json!({
                "deck_id": deck.id,
                "question": "hola",
                "answer": "hello",
                "tags": ["greeting", "basics", "greeting"]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(card["tags"], json!(["basics", "greeting"]));
        let id = card["id"].as_i64().unwrap();

        let (status, report) = call(
            r.clone(),
            "PUT",
            &format!("/cards/{id}/tags"),
            Some(json!({ "tags": ["verbs"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["linked"], 1);

        let (_, tags) = call(r.clone(), "GET", &format!("/cards/{id}/tags"), None).await;
        assert_eq!(tags.as_array().unwrap().len(), 1);
        assert_eq!(tags[0]["name"], "verbs");

        let (_, deck_tags) = call(r, "GET", &format!("/decks/{}/tags", deck.id), None).await;
        assert_eq!(deck_tags.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_sync_reports_phase() {
        let repo = Arc::new(MemoryRepo::new());
        let deck = repo.create_deck("Spanish").await.unwrap();
        repo.create_box("Daily", 1).await.unwrap();
        let r = router(app(repo.clone()));
        let (_, card) = call(
            r.clone(),
            "POST",
            "/cards",
            Some(json!({ "deck_id": deck.id, "question": "q", "answer": "a" })),
        )
        .await;
        let id = card["id"].as_i64().unwrap();

        repo.inject(SyncPhase::CreateTags, Fault::Fail("disk full".into()));
        let (status, body) = call(
            r,
            "PATCH",
            &format!("/cards/{id}"),
            Some(json!({ "tags": ["new"] })),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["phase"], "create tags");
        assert!(repo.pivots().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_card_and_bad_input() {
        let repo = Arc::new(MemoryRepo::new());
        let r = router(app(repo));

        let (status, _) = call(r.clone(), "GET", "/cards/99/tags", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            r,
            "POST",
            "/cards",
            Some(json!({ "deck_id": "nope", "answer": "a" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("deck_id"));
    }
}
