use actix_web::{get, web, Responder, Scope};
use serde::Deserialize;

use crate::{error::Error, service::Service};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    limit: Option<u32>,
}

#[get("")]
async fn list(
    service: web::Data<Service>,
    params: web::Query<ListParams>,
) -> Result<impl Responder, Error> {
    let letters = service.dead_letters(params.limit.unwrap_or(100)).await?;

    Ok(web::Json(letters))
}

pub fn service() -> Scope {
    web::scope("/dlq").service(list)
}
