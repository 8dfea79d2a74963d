use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::{DeliveryTransport, TransportError};
use crate::item::Payload;

/// SMTP delivery via a relay host. The payload body is sent as HTML; when
/// `alt_text` is present the message becomes a plain/html alternative pair.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpTransport {
    pub fn new(relay: &str, from: &str) -> eyre::Result<Self> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(relay)?.build();
        let from = from.parse::<Mailbox>()?;

        Ok(Self { mailer, from })
    }

    fn build_message(&self, recipient: &str, payload: &Payload) -> Result<Message, TransportError> {
        let to = recipient.parse::<Mailbox>().map_err(|e| {
            TransportError::Rejected {
                message: format!("invalid recipient address: {e}"),
            }
        })?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(payload.subject.as_str());

        let built = match &payload.alt_text {
            Some(alt) => builder.multipart(MultiPart::alternative_plain_html(
                alt.clone(),
                payload.body.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(payload.body.clone()),
        };

        built.map_err(|e| TransportError::Rejected {
            message: format!("could not build message: {e}"),
        })
    }
}

#[async_trait]
impl DeliveryTransport for SmtpTransport {
    async fn deliver(&self, recipient: &str, payload: &Payload) -> Result<(), TransportError> {
        let message = self.build_message(recipient, payload)?;

        match self.mailer.send(message).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_permanent() => Err(TransportError::Rejected {
                message: e.to_string(),
            }),
            Err(e) => Err(TransportError::Unavailable {
                message: e.to_string(),
            }),
        }
    }
}
