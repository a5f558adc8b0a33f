use std::sync::Arc;

use anyhow::Context;

use ai_handoff::config::AppConfig;
use ai_handoff::llm::{HttpProviderFactory, validate_api_key};
use ai_handoff::pipeline::{EventBus, Orchestrator, StoreDelivery};
use ai_handoff::server;
use ai_handoff::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;

    eprintln!("🤝 AI Handoff v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Ingest: http://0.0.0.0:{}/api/conversations/{{id}}/turns", config.port);
    eprintln!("   Context turns: {}", config.pipeline.context_turns);
    eprintln!(
        "   Provider timeout: {}s",
        config.pipeline.provider_timeout.as_secs()
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Providers ────────────────────────────────────────────────────────
    let providers = Arc::new(
        HttpProviderFactory::new(config.endpoints.clone(), config.pipeline.provider_timeout)
            .context("Failed to build provider client")?,
    );

    // Report bad credentials up front; runs still proceed and fail per call.
    let agents = db
        .list_active_agent_configs()
        .await
        .context("Failed to load agent configurations")?;
    for agent in &agents {
        let check = validate_api_key(
            providers.client(),
            providers.endpoints(),
            agent.provider,
            &agent.credential,
        )
        .await;
        if check.valid {
            tracing::info!(agent_id = agent.id, provider = %agent.provider, "Credential accepted");
        } else {
            tracing::warn!(
                agent_id = agent.id,
                provider = %agent.provider,
                error = check.error.as_deref().unwrap_or("unknown"),
                "Credential check failed"
            );
        }
    }
    eprintln!("   Active agents: {}", agents.len());

    // ── Pipeline ─────────────────────────────────────────────────────────
    let events = EventBus::new();
    let delivery = Arc::new(StoreDelivery::new(Arc::clone(&db), events.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&db),
        providers,
        delivery,
        events,
        config.pipeline.clone(),
    ));

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = server::routes(Arc::clone(&db), orchestrator);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Ingestion server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}
