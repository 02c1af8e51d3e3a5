use diesel::prelude::*;
use maidflow::{
    create_db_pool, create_router, init_tracing, scheduler::Scheduler, shutdown_telemetry,
    AppState, Config,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    init_tracing(&config);

    info!(
        service = "maidflow",
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.server.environment,
        "Starting server"
    );

    let issues = config.validate_for_production();
    for issue in &issues {
        warn!(issue = %issue, "Configuration warning");
    }

    info!(
        database_url = %config.database.url.split('@').next_back().unwrap_or("***"),
        max_connections = config.database.max_connections,
        "Connecting to database"
    );

    let db_pool = create_db_pool(&config);
    info!("Database connection pool created");

    ensure_default_org(&db_pool);

    let state = AppState::new(db_pool.clone(), config).await;

    let scheduler = Scheduler::new(
        db_pool,
        state.dispatcher(),
        state.config.jobs.clone(),
        state.config.retention.clone(),
    );
    let scheduler_shutdown = scheduler.spawn();
    info!("Scheduler started");

    let app = create_router(state.clone(), &state.config);

    let http_addr = state.config.server_addr();
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, address = %http_addr, "Failed to bind HTTP server");
            std::process::exit(1);
        });

    info!(
        http_address = %http_addr,
        docs_url = %format!("http://{}/swagger-ui", http_addr),
        "HTTP server ready"
    );

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Shutdown signal received");
    };

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await;

    if let Err(e) = result {
        error!(error = %e, "HTTP server error");
    }

    info!("Stopping scheduler...");
    let _ = scheduler_shutdown.send(true);
    // Drain budget for in-flight job iterations.
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    shutdown_telemetry();

    info!("Server shutdown complete");
}

/// Single-tenant deployments rely on a provisioned default org; creating it
/// here keeps first boot turnkey.
fn ensure_default_org(pool: &maidflow::DbPool) {
    use maidflow::models::NewOrganization;
    use maidflow::schema::organizations;

    let Ok(mut conn) = pool.get() else {
        warn!("Could not check for a default organization");
        return;
    };

    let existing: Result<i64, _> = organizations::table
        .filter(organizations::is_default.eq(true))
        .count()
        .get_result(&mut conn);

    if let Ok(0) = existing {
        let created = diesel::insert_into(organizations::table)
            .values(&NewOrganization {
                id: uuid::Uuid::new_v4(),
                name: "Default".to_string(),
                billing_plan: "standard".to_string(),
                is_default: true,
            })
            .execute(&mut conn);

        match created {
            Ok(_) => info!("Provisioned default organization"),
            Err(e) => warn!(error = %e, "Could not provision default organization"),
        }
    }
}
