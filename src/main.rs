use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use notify_hub::client::{
    AlertSink, FeedDeps, FeedOptions, HttpNotificationAccess, NotificationFeed, RealtimeClient,
    TracingAlertSink,
};
use notify_hub::models::notification::{NewNotification, Notification, NotificationType, Priority};
use notify_hub::models::preference::Channel;
use notify_hub::notification::email::EmailDispatcher;
use notify_hub::store::memory::MemoryStore;
use notify_hub::store::postgres::PgStore;
use notify_hub::store::NotificationStore;
use notify_hub::{api, auth, config, jobs, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "notify-hub"),
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
                .unwrap_or_else(|_| "notify_hub=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    // Client-side commands read their settings from .env too.
    dotenvy::dotenv().ok();
    let args = cli::Cli::parse();

    let result = run_command(args.command.unwrap_or(cli::Commands::Serve { port: None })).await;

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Only `serve` and `token` need the hub's own configuration (JWT secret,
/// database); client commands talk to a hub over HTTP.
async fn run_command(command: cli::Commands) -> anyhow::Result<()> {
    match command {
        cli::Commands::Serve { port } => {
            let cfg = config::load()?;
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        cli::Commands::Token { command } => handle_token_command(command, &config::load()?),
        cli::Commands::Send {
            client,
            user,
            kind,
            priority,
            title,
            message,
            link,
            admin_key,
        } => {
            let admin_key =
                admin_key.context("an admin key is required (--admin-key or NOTIFY_HUB_ADMIN_KEY)")?;
            let new = NewNotification {
                user_id: Uuid::parse_str(&user).context("Invalid user id")?,
                r#type: kind.parse::<NotificationType>().map_err(anyhow::Error::msg)?,
                priority: priority.parse::<Priority>().map_err(anyhow::Error::msg)?,
                title,
                message,
                link,
                metadata: None,
            };
            let access = HttpNotificationAccess::new(&client.api_url, "");
            let outcome = access.create_notification(&admin_key, &new).await?;
            match outcome.notification {
                Some(n) => println!(
                    "Notification delivered:\n  ID:        {}\n  In-app:    {}\n  E-mail:    {}\n  Sessions:  {}",
                    n.id, outcome.in_app, outcome.email, outcome.pushed_sessions
                ),
                None => println!(
                    "In-app delivery disabled by the recipient's preferences (e-mail: {}).",
                    outcome.email
                ),
            }
            Ok(())
        }
        cli::Commands::Watch {
            client,
            limit,
            quiet,
        } => run_watch(client, limit, quiet).await,
        cli::Commands::Prefs { command } => handle_prefs_command(command).await,
    }
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let store: Arc<dyn NotificationStore> = match cfg.database_url.as_deref() {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(url).await?;
            tracing::info!("Running migrations...");
            db.migrate().await?;
            Arc::new(db)
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, notifications are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let email = EmailDispatcher::new(
        cfg.email_function_url.clone(),
        cfg.email_signing_secret.clone(),
    );
    if !email.is_enabled() {
        tracing::info!("NOTIFY_HUB_EMAIL_FUNCTION_URL is not set, e-mail delivery disabled");
    }

    if jobs::cleanup::spawn(store.clone(), cfg.retention_days).is_some() {
        tracing::info!(
            retention_days = cfg.retention_days,
            "Background cleanup job started (read notification expiry every 1h)"
        );
    }

    let state = Arc::new(AppState::new(store, email, cfg));
    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("notify-hub listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn handle_token_command(cmd: cli::TokenCommands, cfg: &config::Config) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Issue { user, ttl_hours } => {
            let user_id = Uuid::parse_str(&user).context("Invalid user id")?;
            if ttl_hours <= 0 {
                anyhow::bail!("ttl_hours must be positive");
            }
            let token = auth::issue_token(
                &cfg.jwt_secret,
                user_id,
                chrono::Duration::hours(ttl_hours),
            )?;
            println!("{}", token);
        }
    }
    Ok(())
}

/// Prints alerts straight to the terminal running `watch`.
struct TerminalAlertSink;

impl AlertSink for TerminalAlertSink {
    fn alert(&self, n: &Notification) {
        println!("🔔 [{}] {}: {}", n.priority, n.title, n.message);
    }
}

async fn run_watch(client: cli::ClientArgs, limit: i64, quiet: bool) -> anyhow::Result<()> {
    let authenticated = !client.token.is_empty();
    if !authenticated {
        eprintln!("⚠️  No token given (--token or NOTIFY_HUB_TOKEN); the feed stays empty.");
    }

    let transport = Arc::new(RealtimeClient::new(&client.api_url, &client.token)?);
    let alerts: Arc<dyn AlertSink> = if quiet {
        Arc::new(TracingAlertSink)
    } else {
        Arc::new(TerminalAlertSink)
    };
    let feed = NotificationFeed::mount(
        FeedDeps {
            access: Arc::new(HttpNotificationAccess::new(&client.api_url, client.token.clone())),
            transport: transport.clone(),
            alerts,
        },
        authenticated,
        FeedOptions {
            page_size: limit.clamp(1, 100),
            ..FeedOptions::default()
        },
    )
    .await;

    let initial = feed.state();
    println!("{:<38} {:<10} {:<6} {}", "ID", "PRIORITY", "READ", "TITLE");
    for n in &initial.notifications {
        println!("{:<38} {:<10} {:<6} {}", n.id, n.priority, n.read, n.title);
    }
    println!("Unread: {}", initial.unread_count);

    let mut changes = feed.subscribe();
    let mut last_unread = initial.unread_count;
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let unread = changes.borrow_and_update().unread_count;
                if unread != last_unread {
                    println!("Unread: {}", unread);
                    last_unread = unread;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    feed.unmount();
    transport.disconnect().await;
    Ok(())
}

async fn handle_prefs_command(cmd: cli::PrefsCommands) -> anyhow::Result<()> {
    match cmd {
        cli::PrefsCommands::Show { client } => {
            let access = HttpNotificationAccess::new(&client.api_url, client.token);
            let prefs = access.get_preferences().await?;
            println!("{:<26} {:<8} {:<8}", "EVENT", "EMAIL", "IN_APP");
            for kind in NotificationType::ALL {
                println!(
                    "{:<26} {:<8} {:<8}",
                    kind,
                    prefs.allows(Channel::Email, kind),
                    prefs.allows(Channel::InApp, kind)
                );
            }
        }
        cli::PrefsCommands::Set {
            client,
            channel,
            key,
            enabled,
        } => {
            let channel: Channel = channel.parse().map_err(anyhow::Error::msg)?;
            let access = HttpNotificationAccess::new(&client.api_url, client.token);
            access.set_preference(channel, &key, enabled).await?;
            println!("{} / {} = {}", channel, key, enabled);
        }
        cli::PrefsCommands::Toggle {
            client,
            channel,
            key,
        } => {
            let channel: Channel = channel.parse().map_err(anyhow::Error::msg)?;
            let access = HttpNotificationAccess::new(&client.api_url, client.token);
            let mut prefs = access.get_preferences().await?;
            let enabled = prefs.toggle(channel, &key);
            access.set_preference(channel, &key, enabled).await?;
            println!("{} / {} = {}", channel, key, enabled);
        }
    }
    Ok(())
}
