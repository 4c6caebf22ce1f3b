use axum::{
    Router, routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{
    AppState, ad_deduction_daily, ad_deduction_monthly, check_ai_config, get_exchange_rate,
    get_exchange_rates, health_check, list_settlements, push_order_digest, push_settlement_day,
    push_settlement_range, save_settlement,
};

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest("/api",
            Router::new()
                // Settlement entry
                .route("/settlement", post(save_settlement))
                .route("/settlements", get(list_settlements))

                // Manual pushes
                .route("/notify/orders", post(push_order_digest))
                .route("/settlements/push", post(push_settlement_day))
                .route("/settlements/push-range", post(push_settlement_range))
                .route("/ai/test", post(check_ai_config))

                // Lookups
                .route("/exchange/rates", get(get_exchange_rates))
                .route("/exchange/rates/:currency", get(get_exchange_rate))
                .route("/stats/ad-deduction/daily", get(ad_deduction_daily))
                .route("/stats/ad-deduction/monthly", get(ad_deduction_monthly))
        )
        .layer(CorsLayer::very_permissive())
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

/// Serve until `shutdown` is cancelled.
pub async fn run_server(
    app: Router,
    bind_address: &str,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
