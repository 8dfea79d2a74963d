use actix_web::{get, http::StatusCode, post, web, Responder, Scope};
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    item::{ChannelClass, Payload},
    service::Service,
};

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub channel: ChannelClass,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub alt_text: Option<String>,
}

#[derive(Serialize)]
struct EnqueueResponse {
    id: i64,
}

#[post("")]
async fn enqueue(
    service: web::Data<Service>,
    request: web::Json<EnqueueRequest>,
) -> Result<impl Responder, Error> {
    let request = request.into_inner();

    let id = service
        .try_enqueue(
            request.channel,
            &request.recipient,
            Payload {
                subject: request.subject,
                body: request.body,
                alt_text: request.alt_text,
            },
        )
        .await?;

    Ok((web::Json(EnqueueResponse { id }), StatusCode::CREATED))
}

#[post("/process")]
async fn process(service: web::Data<Service>) -> Result<impl Responder, Error> {
    let report = service.process_queue().await?;

    Ok(web::Json(report))
}

#[get("/stats")]
async fn stats(service: web::Data<Service>) -> Result<impl Responder, Error> {
    let stats = service.stats().await?;

    Ok(web::Json(stats))
}

#[get("/{id}")]
async fn item(
    service: web::Data<Service>,
    path: web::Path<i64>,
) -> Result<impl Responder, Error> {
    let id = path.into_inner();

    let item = service
        .item(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("queue item {id}")))?;

    Ok(web::Json(item))
}

pub fn service() -> Scope {
    web::scope("/queue")
        .service(enqueue)
        .service(process)
        .service(stats)
        .service(item)
}
