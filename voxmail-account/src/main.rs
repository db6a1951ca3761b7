use std::sync::Arc;

use voxmail_account::clock::SystemClock;
use voxmail_account::config::{AppConfig, StoreBackend};
use voxmail_account::engine::{AccountEngine, EngineSettings, OtpDelivery};
use voxmail_account::store::{AccountStore, MemoryStore, PgStore};
use voxmail_account::transport::HttpMailRelay;
use voxmail_account::{cors_layer, router, AppState};
use voxmail_shared::clients::db::create_pool;
use voxmail_shared::clients::email::EmailClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    voxmail_shared::middleware::init_tracing("voxmail-account");

    let config = AppConfig::load()?;
    let port = config.port;

    let store: Arc<dyn AccountStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = create_pool(&config.database_url, config.db_pool_size)?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store, nothing survives a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let metrics_handle = voxmail_shared::middleware::init_metrics()?;

    let delivery = if config.otp_echo_code {
        OtpDelivery::Echo
    } else {
        OtpDelivery::Email(EmailClient::new(&config.resend_api_key, &config.from_email, "voxmail"))
    };

    let settings = EngineSettings {
        session_secret: config.session_secret.clone(),
        previous_session_secret: config.session_previous_secret.clone(),
        session_ttl: config.session_ttl(),
        otp_ttl: config.otp_ttl(),
    };
    let engine = AccountEngine::new(
        store,
        Arc::new(SystemClock),
        &settings,
        Arc::new(HttpMailRelay::new(&config.mail_relay_url)),
        delivery,
    );

    let state = Arc::new(AppState {
        engine,
        metrics_handle: Some(metrics_handle),
    });
    let app = router(state, cors_layer(&config.cors_origin)?);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, backend = ?config.store_backend, "voxmail-account starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
