use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use onelink::config::{Config, DatabaseBackend};
use onelink::models::User;
use onelink::permission::Role;
use onelink::storage::{PostgresStorage, SqliteStorage, Storage};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "onelink-admin")]
#[command(about = "OneLink operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all users with their roles
    Users,
    /// Assign a role (guest, regular, privileged, editor, admin)
    SetRole {
        username: String,
        role: String,
    },
    /// Delete a user together with their links and clicks
    DeleteUser {
        username: String,
    },
    /// List short links
    Links {
        /// Only show links owned by this user
        #[arg(long)]
        owner: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
    };

    // Ensure database is initialized
    storage.init().await?;

    match cli.command {
        Commands::Users => {
            let users = storage.list_users().await?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<8} {:<32} {:<12} {}", "ID", "Username", "Role", "Created");
                println!("{}", "-".repeat(80));
                for user in users {
                    println!(
                        "{:<8} {:<32} {:<12} {}",
                        user.id,
                        user.username,
                        role_label(&user),
                        format_timestamp(user.created_at)
                    );
                }
            }
        }
        Commands::SetRole { username, role } => {
            let role: Role = role.parse()?;
            let user = find_user(storage.as_ref(), &username).await?;
            if user.is_anonymous() {
                bail!("the anonymous user's role cannot be changed");
            }
            storage.update_permissions(user.id, role.permissions()).await?;
            println!("✓ User '{}' is now {}", username, role);
        }
        Commands::DeleteUser { username } => {
            let user = find_user(storage.as_ref(), &username).await?;
            if user.is_anonymous() {
                bail!("the anonymous user cannot be deleted");
            }
            if storage.delete_user(user.id).await? {
                println!("✓ Deleted user '{}' and their links", username);
            } else {
                println!("⚠ User '{}' was already gone", username);
            }
        }
        Commands::Links { owner } => {
            let links = match owner {
                Some(name) => {
                    let user = find_user(storage.as_ref(), &name).await?;
                    storage.list_links_by_owner(user.id).await?
                }
                None => storage.list_all_links().await?,
            };
            if links.is_empty() {
                println!("No links found.");
            } else {
                println!(
                    "{:<8} {:<24} {:<16} {:<8} {}",
                    "ID", "Path", "Owner", "Clicks", "Destination"
                );
                println!("{}", "-".repeat(100));
                for summary in links {
                    println!(
                        "{:<8} {:<24} {:<16} {:<8} {}",
                        summary.link.id,
                        summary.link.short_path,
                        summary.owner_username,
                        summary.total_clicks,
                        summary.link.original_url
                    );
                }
            }
        }
    }

    Ok(())
}

async fn find_user(storage: &dyn Storage, username: &str) -> Result<User> {
    storage
        .get_user_by_username(username)
        .await?
        .with_context(|| format!("user '{username}' not found"))
}

fn role_label(user: &User) -> String {
    match user.role() {
        Some(role) => role.to_string(),
        None => format!("custom({})", user.permissions.bits()),
    }
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
