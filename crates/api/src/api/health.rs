use actix_web::{HttpResponse, Responder, get};
use serde_json::json;

#[utoipa::path(
    responses(
        (status = 200, description = "Service is up"),
    ),
    tag = "Health",
)]
#[get("/health")]
pub(crate) async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}
