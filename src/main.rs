use axum::extract::DefaultBodyLimit;
use examprep_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    database::store::PgDocumentStore,
    routes,
    services::extraction_service::OpenAiClient,
    AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;
    let inference = Arc::new(OpenAiClient::new(
        config.openai_api_key.clone(),
        config.openai_api_url.clone(),
        http_client,
    ));
    let store = Arc::new(PgDocumentStore::new(pool));
    let app_state = AppState::new(store, inference);

    let app = routes::api_router(app_state, config.upload_rps)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(
            (config.max_upload_mb + 5) * 1024 * 1024,
        ));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
