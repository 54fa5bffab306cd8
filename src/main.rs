mod api;
mod audio;
mod config;
mod error;
mod gateway;
mod language;
mod profile;
mod response;

use std::sync::Arc;

use tracing::{info, warn};

use crate::api::{build_router, AppState};
use crate::config::AppConfig;
use crate::gateway::build_gateway;
use crate::profile::{bootstrap, ActiveProfile, ProfileStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speech_babelon_server=info,axum=info".into()),
        )
        .compact()
        .init();

    let cfg = AppConfig::from_env()?;
    let profiles = Arc::new(ProfileStore::open(&cfg.profile_dir)?);
    let active = Arc::new(ActiveProfile::open(
        Arc::clone(&profiles),
        &cfg.active_profile_file,
    )?);
    bootstrap(
        &profiles,
        &active,
        cfg.bootstrap_profile_file.as_deref(),
        cfg.default_profile.as_deref(),
    )?;
    let gateway = build_gateway(&cfg)?;

    match active.current_profile() {
        Ok(profile) if cfg.verify_profiles => match gateway.verify(&profile).await {
            Ok(()) => info!(
                profile = %profile.name,
                region = %profile.service_region,
                "active profile verified"
            ),
            Err(err) => warn!(
                profile = %profile.name,
                error = %err,
                "active profile failed credential check"
            ),
        },
        Ok(profile) => info!(
            profile = %profile.name,
            region = %profile.service_region,
            "active profile loaded"
        ),
        Err(err) => warn!(
            error = %err,
            "no usable active profile; upload and select one before sending audio"
        ),
    }

    let state = Arc::new(AppState::new(
        cfg.clone(),
        Arc::clone(&profiles),
        active,
        gateway,
    ));
    let app = build_router(state);

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        host = %cfg.host,
        port = cfg.port,
        profile_dir = ?profiles.root(),
        verify_profiles = cfg.verify_profiles,
        "starting speech-babelon-server"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("speech-babelon-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
