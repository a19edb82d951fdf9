use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use kinboard_lib::auth::users::{self, NewUser};
use kinboard_lib::config::{Args, Command, UserCommand};
use kinboard_lib::db::{open_sqlite_pool, Db};
use kinboard_lib::logging::init_logging;
use kinboard_lib::migrate::apply_migrations;
use kinboard_lib::reminder_poller::{self, LogSink};
use kinboard_lib::state::AppState;
use kinboard_lib::stats::StatsCache;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let _log_guard = init_logging(args.log_dir.as_deref());

    if let Err(message) = args.validate() {
        tracing::error!(target: "kinboard", event = "config_invalid", error = %message);
        eprintln!("Configuration error: {message}");
        process::exit(2);
    }

    if let Err(err) = run(args).await {
        tracing::error!(target: "kinboard", event = "fatal", error = %format!("{err:#}"));
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

async fn open_db(args: &Args) -> Result<Db> {
    let settings = args.pool_settings();
    let database = args.database();
    let pool = open_sqlite_pool(&database, &settings)
        .await
        .with_context(|| format!("open database {database}"))?;
    apply_migrations(&pool).await.context("apply migrations")?;
    Ok(Db::new(pool, settings.statement_timeout))
}

async fn run(args: Args) -> Result<()> {
    let db = open_db(&args).await?;
    match args.command() {
        Command::Serve => serve(args, db).await,
        Command::Migrate => {
            tracing::info!(target: "kinboard", event = "migrate_complete");
            Ok(())
        }
        Command::User(UserCommand::Create(create)) => {
            let user = users::create_user(
                &db,
                &NewUser {
                    username: create.username,
                    email: create.email,
                    password: create.password,
                    full_name: create.full_name,
                    role: create.role.into(),
                },
            )
            .await?;
            println!("created user {} ({}) with id {}", user.username, user.role.as_str(), user.id);
            Ok(())
        }
        Command::User(UserCommand::Disable { username }) => {
            users::set_active(&db, &username, false).await?;
            println!("disabled user {username}");
            Ok(())
        }
    }
}

async fn serve(args: Args, db: Db) -> Result<()> {
    let issuer = args.token_issuer()?;
    let state = AppState::new(db.clone(), issuer)
        .with_max_upload_bytes(args.max_upload_bytes)
        .with_stats_cache(StatsCache::new(args.stats_ttl()));
    let app = kinboard_lib::http::router(state, args.cors_origin.as_deref())?;

    let poller = args
        .reminder_poll_interval()
        .map(|interval| reminder_poller::spawn(db, Arc::new(LogSink), interval));

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    let served = kinboard_lib::http::serve(listener, app, shutdown_signal()).await;

    if let Some(poller) = poller {
        poller.stop().await;
    }
    tracing::info!(target: "kinboard", event = "shutdown_complete");
    served.context("http server")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "kinboard", event = "signal_listen_failed", error = %err);
        std::future::pending::<()>().await;
    }
    tracing::info!(target: "kinboard", event = "shutdown_requested");
}
