use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vpdb::api::users::user_changed;
use vpdb::config::{self, Config};
use vpdb::middleware::acl;
use vpdb::models::plan;
use vpdb::models::token::Token;
use vpdb::models::user::User;
use vpdb::store::Query;
use vpdb::AppState;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "vpdb=debug,tower_http=debug".into()),
    );
    if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port, in_memory }) => run_server(cfg, port, in_memory).await,
        None => run_server(cfg, None, false).await,
        Some(cli::Commands::User { command }) => handle_user_command(command, cfg).await,
        Some(cli::Commands::Token { command }) => handle_token_command(command, cfg).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run_server(cfg: Config, port: Option<u16>, in_memory: bool) -> anyhow::Result<()> {
    let port = port.unwrap_or(cfg.port);
    let state = if in_memory {
        tracing::warn!("Running on in-memory storage, nothing will be persisted");
        AppState::in_memory(cfg)
    } else {
        AppState::connect(cfg).await?
    };
    let state = Arc::new(state);
    let shutdown = state.shutdown.clone();
    let app = vpdb::api::app(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("VPDB API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.notified() => tracing::warn!("Kill switch triggered, shutting down"),
                _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl-C, shutting down"),
            }
        })
        .await?;

    state.jobs.drain(std::time::Duration::from_secs(10)).await;
    Ok(())
}

fn check_roles(roles: &[String]) -> anyhow::Result<()> {
    for role in roles {
        if acl::find_role(role).is_none() {
            anyhow::bail!("Unknown role: {}", role);
        }
    }
    Ok(())
}

async fn handle_user_command(cmd: cli::UserCommands, cfg: Config) -> anyhow::Result<()> {
    let state = AppState::connect(cfg).await?;
    let users = state.db.repo::<User>();
    match cmd {
        cli::UserCommands::Add {
            name,
            email,
            password,
            plan: plan_id,
            roles,
        } => {
            let plan_id = plan_id.unwrap_or_else(|| state.config.default_plan.clone());
            if plan::find(&plan_id).is_none() {
                anyhow::bail!("Unknown plan: {}", plan_id);
            }
            if users.find_one(User::name_filter(&name)).await?.is_some() {
                anyhow::bail!("User name '{}' is already taken", name);
            }
            if users.find_one(User::email_filter(&email)).await?.is_some() {
                anyhow::bail!("Email '{}' is already registered", email);
            }

            let mut user = User::new(&name, &email, &password, &plan_id)?;
            if let Some(roles) = roles {
                check_roles(&roles)?;
                user.roles = roles;
            }
            users.insert(&user).await?;
            println!(
                "User created:\n  ID:    {}\n  Name:  {}\n  Roles: {}\n  Plan:  {}",
                user.id,
                user.name,
                user.roles.join(", "),
                user.plan
            );
        }
        cli::UserCommands::Roles { id, roles } => {
            check_roles(&roles)?;
            let updated = users
                .modify(&id, move |u: &mut User| {
                    u.roles = roles;
                    Ok(())
                })
                .await?
                .with_context(|| format!("User not found: {}", id))?;
            user_changed(&state, &updated.id, true).await?;
            println!("Roles of {} set to: {}", updated.name, updated.roles.join(", "));
        }
        cli::UserCommands::Plan { id, plan: plan_id } => {
            if plan::find(&plan_id).is_none() {
                anyhow::bail!("Unknown plan: {}", plan_id);
            }
            let updated = users
                .modify(&id, move |u: &mut User| {
                    u.plan = plan_id;
                    Ok(())
                })
                .await?
                .with_context(|| format!("User not found: {}", id))?;
            user_changed(&state, &updated.id, true).await?;
            println!("Plan of {} set to: {}", updated.name, updated.plan);
        }
    }
    Ok(())
}

async fn handle_token_command(cmd: cli::TokenCommands, cfg: Config) -> anyhow::Result<()> {
    let state = AppState::connect(cfg).await?;
    let tokens = state.db.repo::<Token>();
    match cmd {
        cli::TokenCommands::List { user } => {
            let owned = tokens.find(&Query::filter(Token::owner_filter(&user))).await?;
            if owned.is_empty() {
                println!("No tokens found.");
            } else {
                println!(
                    "{:<24} {:<24} {:<12} {:<8} {:<20}",
                    "ID", "LABEL", "TYPE", "ACTIVE", "EXPIRES"
                );
                for t in owned {
                    println!(
                        "{:<24} {:<24} {:<12} {:<8} {:<20}",
                        t.id,
                        t.label,
                        format!("{:?}", t.token_type).to_lowercase(),
                        t.is_active,
                        t.expires_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
        cli::TokenCommands::Revoke { id } => {
            tokens
                .modify(&id, |t: &mut Token| {
                    t.is_active = false;
                    Ok(())
                })
                .await?
                .with_context(|| format!("Token not found: {}", id))?;
            println!("Token {} revoked.", id);
        }
    }
    Ok(())
}
