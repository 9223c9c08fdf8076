use std::sync::Arc;

use farmlink_server::config::{AdminSeed, ServerConfig};
use farmlink_server::{api, AppState};
use farmlink_shared::{Role, User};
use farmlink_store::{Database, SharedDatabase, UserDirectory};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,farmlink_server=debug")),
        )
        .init();

    info!("Starting FarmLink chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::open_default()?,
    };
    info!(path = ?db.path(), "Database ready");
    let store = SharedDatabase::new(db);

    if let Some(seed) = &config.admin_seed {
        seed_admin(&store, seed)?;
    }

    let http_addr = config.http_addr;
    let app_state = AppState::new(Arc::new(store), config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

/// Create the configured admin account unless it already exists.
fn seed_admin(store: &SharedDatabase, seed: &AdminSeed) -> anyhow::Result<()> {
    if let Some(existing) = store.find_user(&seed.id.as_str().into())? {
        info!(user = %existing.id, role = existing.role.as_str(), "Admin account already present");
        return Ok(());
    }

    store.upsert_user(&User {
        id: seed.id.as_str().into(),
        name: seed.name.clone(),
        role: Role::Admin,
        email: seed.email.clone(),
    })?;
    info!(user = %seed.id, "Admin account created");
    Ok(())
}
