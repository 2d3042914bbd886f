use std::sync::Arc;
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gymdesk::{
    api,
    config::{GatewayKind, Settings},
    gateway::{HttpGateway, PaymentGateway, VirtualGateway},
    service::ServiceContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gymdesk=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    tracing::info!("Starting gymdesk on {}:{}", settings.server.host, settings.server.port);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    let (gateway, virtual_gateway): (Arc<dyn PaymentGateway>, Option<Arc<VirtualGateway>>) =
        match settings.gateway.kind {
            GatewayKind::Http => {
                tracing::info!("Using HTTP payment gateway {}", settings.gateway.name);
                (Arc::new(HttpGateway::new(&settings.gateway)?), None)
            }
            GatewayKind::Virtual => {
                tracing::warn!("Using the virtual payment gateway; no real money moves");
                let virtual_gateway = Arc::new(VirtualGateway::new(settings.server.base_url.clone()));
                (virtual_gateway.clone(), Some(virtual_gateway))
            }
        };

    let service_context = Arc::new(ServiceContext::new(db_pool, gateway, &settings));

    match service_context.auth_service.cleanup_expired_tokens().await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Removed {} expired refresh tokens", n),
        Err(e) => tracing::warn!("Refresh token cleanup failed: {}", e),
    }

    let app = api::create_app(service_context, virtual_gateway, Arc::new(settings.clone()));

    let listener = tokio::net::TcpListener::bind(
        format!("{}:{}", settings.server.host, settings.server.port)
    ).await?;

    tracing::info!("Server listening on http://{}:{}", settings.server.host, settings.server.port);

    axum::serve(listener, app).await?;

    Ok(())
}
