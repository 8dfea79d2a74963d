use actix_web::{get, web, Responder, Scope};

use crate::{error::Error, service::Service};

#[get("")]
async fn health(service: web::Data<Service>) -> Result<impl Responder, Error> {
    sqlx::query("SELECT 1").execute(service.db()).await?;

    Ok(web::Json(serde_json::json!({ "status": "ok" })))
}

pub fn service() -> Scope {
    web::scope("/health").service(health)
}
