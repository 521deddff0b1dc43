//! HTTP surface for the chat feature.
//!
//! `POST /chat` answers a question about the dataset, `GET /ping` is a
//! health check and `GET /count_rows` reports the dataset size. The
//! dataset is loaded once and shared read-only by every worker.

use crate::chat::{ChatReply, ChatService};
use crate::error::DashboardError;
use crate::loader::Dataset;
use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{middleware, web, App, HttpRequest, HttpResponse, HttpServer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub dataset: Arc<Dataset>,
    pub chat: ChatService,
}

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
struct RowCount {
    num_rows: usize,
}

/// `POST /chat`
pub async fn chat(state: web::Data<AppState>, body: web::Json<QuestionRequest>) -> HttpResponse {
    match state.chat.ask(&state.dataset, &body.question).await {
        Ok(answer) => HttpResponse::Ok().json(ChatReply::Answer(answer)),
        Err(e) => {
            log::error!("Chat request failed: {e}");
            let reply = ChatReply::Error(e.to_string());
            match e {
                DashboardError::InvalidParameter { .. } => HttpResponse::BadRequest().json(reply),
                DashboardError::MissingConfiguration { .. } => {
                    HttpResponse::ServiceUnavailable().json(reply)
                }
                _ => HttpResponse::BadGateway().json(reply),
            }
        }
    }
}

/// `GET /ping`
pub async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// `GET /count_rows`
pub async fn count_rows(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(RowCount {
        num_rows: state.dataset.row_count(),
    })
}

/// Unreadable `POST /chat` bodies answer 400 in the same `{"error"}` shape
/// as every other chat failure.
fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    log::warn!("Rejected chat body: {err}");
    let reply = ChatReply::Error(format!("Error: invalid request body: {err}"));
    InternalError::from_response(err, HttpResponse::BadRequest().json(reply)).into()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .route("/chat", web::post().to(chat))
        .route("/ping", web::get().to(ping))
        .route("/count_rows", web::get().to(count_rows));
}

/// Serve until shut down. The caller provides the async runtime.
///
/// # Errors
///
/// Returns an `std::io::Error` if the listener cannot bind or the server
/// fails at runtime.
pub async fn run_server(
    dataset: Arc<Dataset>,
    chat: ChatService,
    bind_addr: &str,
    port: u16,
) -> std::io::Result<()> {
    if !chat.is_configured() {
        log::warn!("Chat backend is not configured; POST /chat will answer 503");
    }
    let state = web::Data::new(AppState { dataset, chat });

    log::info!("Starting server on {bind_addr}:{port}");
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatAnswer, QueryBackend};
    use crate::error::Result;
    use crate::loader::read_observations;
    use actix_web::{http::StatusCode, test};

    struct Echo;

    #[async_trait::async_trait]
    impl QueryBackend for Echo {
        async fn ask(&self, dataset: &Dataset, question: &str) -> Result<ChatAnswer> {
            if question == "fail" {
                return Err(DashboardError::backend("model unavailable"));
            }
            Ok(ChatAnswer::Text(format!("{} rows", dataset.row_count())))
        }
    }

    fn state(backend: Option<Arc<dyn QueryBackend>>) -> web::Data<AppState> {
        let csv = "location,date,total_cases\nChile,2021-01-01,1\nChile,2021-01-02,2\nPeru,2021-01-01,5\n";
        let (dataset, _) = read_observations(csv.as_bytes()).unwrap();
        web::Data::new(AppState {
            dataset: Arc::new(dataset),
            chat: ChatService::new(backend),
        })
    }

    #[actix_web::test]
    async fn ping_and_count_rows() {
        let app = test::init_service(
            App::new().app_data(state(None)).configure(configure),
        )
        .await;

        let resp: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/ping").to_request())
                .await;
        assert_eq!(resp, serde_json::json!({"status": "ok"}));

        let resp: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/count_rows").to_request(),
        )
        .await;
        assert_eq!(resp, serde_json::json!({"num_rows": 3}));
    }

    #[actix_web::test]
    async fn chat_answers_and_errors() {
        let app = test::init_service(
            App::new()
                .app_data(state(Some(Arc::new(Echo))))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/chat")
            .set_json(serde_json::json!({"question": "how many?"}))
            .to_request();
        let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp, serde_json::json!({"answer": "3 rows"}));

        let req = test::TestRequest::post()
            .uri("/chat")
            .set_json(serde_json::json!({"question": "fail"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("model unavailable"));

        let req = test::TestRequest::post()
            .uri("/chat")
            .set_json(serde_json::json!({"question": " "}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn malformed_chat_bodies_get_an_error_body() {
        let app = test::init_service(
            App::new()
                .app_data(state(Some(Arc::new(Echo))))
                .configure(configure),
        )
        .await;

        let bodies = [
            test::TestRequest::post()
                .uri("/chat")
                .insert_header(("content-type", "application/json"))
                .set_payload("{not json")
                .to_request(),
            test::TestRequest::post()
                .uri("/chat")
                .set_json(serde_json::json!({"query": "how many?"}))
                .to_request(),
        ];
        for req in bodies {
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: serde_json::Value = test::read_body_json(resp).await;
            assert!(body["error"]
                .as_str()
                .unwrap()
                .starts_with("Error: invalid request body"));
        }
    }

    #[actix_web::test]
    async fn chat_without_key_is_unavailable() {
        let app = test::init_service(App::new().app_data(state(None)).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/chat")
            .set_json(serde_json::json!({"question": "hello"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("GEMINI_API_KEY"));
    }
}
