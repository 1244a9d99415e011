use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cache;
mod cli;
mod config;
mod errors;
mod jobs;
mod middleware;
mod models;
mod notification;
mod store;

use cache::TieredCache;
use store::postgres::PgStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub db: PgStore,
    pub cache: TieredCache,
    pub webhook: notification::webhook::WebhookNotifier,
    pub config: config::Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export is opt-in: only wired up when an endpoint is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "rankpilot-api"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .expect("failed to install OpenTelemetry tracer");
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "rankpilot=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::User { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_user_command(&db, command).await
        }
        Some(cli::Commands::Key { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_key_command(&db, command).await
        }
        Some(cli::Commands::Token { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_token_command(&db, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    tracing::info!("Connecting to Redis...");
    let redis_client = redis::Client::open(cfg.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;
    let cache = TieredCache::new(redis_conn);

    let webhook = notification::webhook::WebhookNotifier::new(cfg.webhook_signing_secret.clone());

    let state = Arc::new(AppState {
        db,
        cache,
        webhook,
        config: cfg,
    });

    // Dashboard origin CORS for the authenticated management surface.
    // The bookmarklet validate endpoint instead allows any origin, since
    // the snippet runs on whatever page the user happens to be on.
    let dashboard_cors = {
        use axum::http::{HeaderName, Method};
        use tower_http::cors::AllowOrigin;
        let dashboard_origin = std::env::var("DASHBOARD_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(move |origin, _| {
                let origin_str = origin.to_str().unwrap_or("");
                origin_str == dashboard_origin
                    || origin_str.starts_with("http://localhost:")
                    || origin_str.starts_with("http://127.0.0.1:")
            }))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
                Method::OPTIONS,
            ])
            // Cannot use AllowHeaders::any() with allow_credentials(true) per CORS spec
            .allow_headers([
                HeaderName::from_static("content-type"),
                HeaderName::from_static("authorization"),
                HeaderName::from_static("x-admin-key"),
                HeaderName::from_static("x-request-id"),
            ])
            .allow_credentials(true)
    };

    let api = api::public_router()
        .layer(CorsLayer::permissive())
        .merge(api::api_router(state.clone()).layer(dashboard_cors.clone()))
        .nest("/admin", api::admin_router(state.clone()).layer(dashboard_cors));

    let app = axum::Router::new()
        // Health endpoints (no auth)
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .route("/readyz", axum::routing::get(readiness_check))
        .nest("/api", api)
        .with_state(state.clone())
        // Request bodies here are small JSON payloads
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    // Hourly pass: purge long-expired token rows, evict stale cache entries
    jobs::cleanup::spawn(state.db.clone(), state.cache.clone());
    tracing::info!("Background cleanup job started (token purge every 1h)");

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("RankPilot API listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

async fn readiness_check() -> &'static str {
    "ok"
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("X-XSS-Protection", "1; mode=block".parse().unwrap());
    headers.insert("Cache-Control", "no-store".parse().unwrap());
    headers.insert("Referrer-Policy", "no-referrer".parse().unwrap());
    headers.insert(
        "Permissions-Policy",
        "camera=(), microphone=(), geolocation=()".parse().unwrap(),
    );
    headers.remove("Server");

    resp
}

async fn handle_user_command(db: &PgStore, cmd: cli::UserCommands) -> anyhow::Result<()> {
    match cmd {
        cli::UserCommands::Create { email, plan } => {
            let plan = normalize_plan(&plan)?;
            let id = db.create_user(&email, plan).await?;
            println!("User created:\n  ID:    {}\n  Email: {}\n  Plan:  {}", id, email, plan);
        }
        cli::UserCommands::List => {
            let users = db.list_users().await?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<38} {:<30} {:<10} CREATED", "ID", "EMAIL", "PLAN");
                for u in users {
                    println!(
                        "{:<38} {:<30} {:<10} {}",
                        u.id,
                        u.email,
                        u.plan,
                        u.created_at.format("%Y-%m-%d")
                    );
                }
            }
        }
        cli::UserCommands::SetPlan { user_id, plan } => {
            let id = uuid::Uuid::parse_str(&user_id).context("Invalid user_id")?;
            let plan = normalize_plan(&plan)?;
            if db.set_user_plan(id, plan).await? {
                println!("Plan updated to {}.", plan);
            } else {
                println!("User not found.");
            }
        }
    }
    Ok(())
}

async fn handle_key_command(db: &PgStore, cmd: cli::KeyCommands) -> anyhow::Result<()> {
    match cmd {
        cli::KeyCommands::Create { user_id, name } => {
            let uid = uuid::Uuid::parse_str(&user_id).context("Invalid user_id")?;
            let key = api::handlers::mint_api_key();
            let key_hash = api::hash_api_key(&key);
            let prefix = &key[..12];
            let id = db.create_api_key(uid, &name, &key_hash, prefix).await?;
            println!("API key created (shown once, store it now):");
            println!("  ID:   {}", id);
            println!("  Name: {}", name);
            println!("  Key:  {}", key);
        }
        cli::KeyCommands::List { user_id } => {
            let uid = uuid::Uuid::parse_str(&user_id).context("Invalid user_id")?;
            let keys = db.list_api_keys(uid).await?;
            if keys.is_empty() {
                println!("No API keys found.");
            } else {
                println!("{:<38} {:<20} {:<16} {:<8} CREATED", "ID", "NAME", "PREFIX", "ACTIVE");
                for k in keys {
                    println!(
                        "{:<38} {:<20} {:<16} {:<8} {}",
                        k.id,
                        k.name,
                        k.key_prefix,
                        k.is_active,
                        k.created_at.format("%Y-%m-%d")
                    );
                }
            }
        }
        cli::KeyCommands::Revoke { id, user_id } => {
            let key_id = uuid::Uuid::parse_str(&id).context("Invalid key ID")?;
            let uid = uuid::Uuid::parse_str(&user_id).context("Invalid user_id")?;
            if db.revoke_api_key(key_id, uid).await?.is_some() {
                println!("API key revoked.");
            } else {
                println!("API key not found.");
            }
        }
    }
    Ok(())
}

async fn handle_token_command(db: &PgStore, cmd: cli::TokenCommands) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::List { project_id, user_id } => {
            let pid = uuid::Uuid::parse_str(&project_id).context("Invalid project_id")?;
            let uid = uuid::Uuid::parse_str(&user_id).context("Invalid user_id")?;
            let tokens = db.list_bookmarklet_tokens(pid, uid).await?;
            if tokens.is_empty() {
                println!("No tokens found.");
            } else {
                println!("{:<40} {:<8} {:<8} EXPIRES", "TOKEN", "USED", "MAX");
                let now = chrono::Utc::now();
                for t in &tokens {
                    println!(
                        "{:<40} {:<8} {:<8} {} ({:?})",
                        t.token,
                        t.usage_count,
                        t.max_usage,
                        t.expires_at.format("%Y-%m-%d %H:%M"),
                        t.status(now)
                    );
                }
            }
        }
        cli::TokenCommands::Purge { days } => {
            let purged = db.purge_expired_tokens(chrono::Duration::days(days)).await?;
            println!("Purged {} expired token(s).", purged);
        }
    }
    Ok(())
}

fn normalize_plan(plan: &str) -> anyhow::Result<&str> {
    match plan {
        "free" | "starter" | "pro" => Ok(plan),
        other => anyhow::bail!("invalid plan: {}. Must be free, starter, or pro", other),
    }
}
