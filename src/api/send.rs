use actix_web::{post, web, Responder, Scope};
use serde::{Deserialize, Serialize};

use crate::{error::Error, item::Payload, service::Service};

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub alt_text: Option<String>,
}

#[derive(Serialize)]
struct SendResponse {
    delivered: bool,
}

/// Synchronous delivery with in-process retries. Responds only after the
/// attempts resolve, so callers should expect this to block for the retry
/// delays in the worst case.
#[post("")]
async fn send(
    service: web::Data<Service>,
    request: web::Json<SendRequest>,
) -> Result<impl Responder, Error> {
    let request = request.into_inner();

    if request.recipient.trim().is_empty() {
        return Err(Error::invalid_parameter("recipient must not be empty"));
    }

    let delivered = service
        .send_critical(
            &request.recipient,
            Payload {
                subject: request.subject,
                body: request.body,
                alt_text: request.alt_text,
            },
        )
        .await;

    Ok(web::Json(SendResponse { delivered }))
}

pub fn service() -> Scope {
    web::scope("/send").service(send)
}
