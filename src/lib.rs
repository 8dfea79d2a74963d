use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{
    middleware::{NormalizePath, TrailingSlash},
    web::{Data, JsonConfig},
    App, HttpServer,
};
use config::Config;
use tracing::level_filters::LevelFilter;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};
use transport::{memory::MemoryTransport, smtp::SmtpTransport, DeliveryTransport};

pub mod api;
pub mod backoff;
pub mod config;
pub mod error;
pub mod item;
pub mod service;
pub mod store;
pub mod transport;

/// Returns a builder for the main application.
///
/// Boots logging and configuration, connects the queue service, and serves
/// the HTTP surface until shutdown. A transport can be injected; otherwise
/// one is picked from the SMTP settings, falling back to the in-memory
/// transport when none are present.
#[bon::builder(finish_fn = start)]
pub async fn run(transport: Option<Arc<dyn DeliveryTransport>>) -> eyre::Result<()> {
    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("RELAYQ_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("RELAYQ_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    let config = Config::load()?;

    let host = config.host().to_owned();

    let transport: Arc<dyn DeliveryTransport> = match transport {
        Some(transport) => transport,
        None => match (&config.smtp_relay, &config.smtp_from) {
            (Some(relay), Some(from)) => Arc::new(SmtpTransport::new(relay, from)?),
            _ => {
                tracing::warn!(
                    "no smtp relay configured, deliveries go to the in-memory transport"
                );
                Arc::new(MemoryTransport::new())
            }
        },
    };

    let service = service::Service::connect_with(config, transport).await?;

    let _processor = service
        .config()
        .process_interval()
        .map(|every| service.spawn_interval_processor(every));

    let data = Data::new(service);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_header()
            .allow_any_method();

        let json_cfg = JsonConfig::default().content_type_required(false);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(NormalizePath::new(TrailingSlash::Trim))
            .wrap(cors)
            .service(api::queue::service())
            .service(api::send::service())
            .service(api::dead_letter::service())
            .service(api::health::service())
            .app_data(data.clone())
            .app_data(json_cfg)
    })
    .bind(host)?
    .run()
    .await?;

    Ok(())
}
