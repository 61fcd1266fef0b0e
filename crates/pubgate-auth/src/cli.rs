//! Command-line interface for managing the user store.
//!
//! Usable as the standalone `pubgate-auth` binary or as the `auth` subcommand of
//! the main `pubgate` binary.
//!
//! # Usage
//!
//! ```bash
//! # Create or migrate the store
//! pubgate-auth init -d sqlite:user.db
//!
//! # Add a user and let it publish to its own topics
//! pubgate-auth add -d sqlite:user.db -u ben -p secret
//! pubgate-auth allow -d sqlite:user.db -u ben -t 'ben-*' read-write
//!
//! # Let anonymous clients read announcements
//! pubgate-auth allow -d sqlite:user.db -u '*' -t announcements read-only
//!
//! # Show users and their grants
//! pubgate-auth list -d sqlite:user.db
//! pubgate-auth access -d sqlite:user.db
//! ```

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tabled::{Table, Tabled};

use crate::sql::{Manager, ManagerConfig};
use crate::{AuthError, HashCost, Permission, Role, Tier, User, hash_password};

/// pubgate user management CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pubgate-auth",
    version,
    about = "Manage pubgate users, grants, tokens and tiers"
)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommands,
}

/// Store location shared by all commands.
#[derive(Args, Debug, Clone)]
pub struct DatabaseArg {
    /// Database connection URL.
    #[arg(short, long, env = "DATABASE_URL")]
    pub database: String,
}

/// Auth CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum AuthCommands {
    /// Create the store, or migrate it to the current schema.
    Init {
        #[command(flatten)]
        db: DatabaseArg,
    },

    /// Add a new user.
    Add {
        #[command(flatten)]
        db: DatabaseArg,

        /// Username.
        #[arg(short, long)]
        username: String,

        /// Password.
        #[arg(short, long, env = "PUBGATE_PASSWORD")]
        password: String,

        /// Role (user or admin).
        #[arg(short, long, default_value = "user", value_parser = Role::parse_assignable)]
        role: Role,
    },

    /// Remove a user with its grants, reservations and tokens.
    Remove {
        #[command(flatten)]
        db: DatabaseArg,

        #[arg(short, long)]
        username: String,
    },

    /// List all users.
    List {
        #[command(flatten)]
        db: DatabaseArg,

        /// Output format (table, json, csv).
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Change the password of a user.
    ChangePass {
        #[command(flatten)]
        db: DatabaseArg,

        #[arg(short, long)]
        username: String,

        #[arg(short, long, env = "PUBGATE_PASSWORD")]
        password: String,
    },

    /// Change the role of a user. Promoting to admin drops its grants.
    ChangeRole {
        #[command(flatten)]
        db: DatabaseArg,

        #[arg(short, long)]
        username: String,

        #[arg(short, long, value_parser = Role::parse_assignable)]
        role: Role,
    },

    /// Assign a tier to a user, or remove it with --reset.
    ChangeTier {
        #[command(flatten)]
        db: DatabaseArg,

        #[arg(short, long)]
        username: String,

        /// Tier code.
        #[arg(short, long, required_unless_present = "reset")]
        tier: Option<String>,

        /// Remove the user's tier.
        #[arg(long, conflicts_with = "tier")]
        reset: bool,
    },

    /// Grant access on a topic pattern to a user, or to everyone with '*'.
    Allow {
        #[command(flatten)]
        db: DatabaseArg,

        #[arg(short, long)]
        username: String,

        /// Topic or wildcard pattern (e.g. "alerts", "alerts-*").
        #[arg(short, long)]
        topic: String,

        /// read-write, read-only, write-only or deny-all.
        permission: Permission,
    },

    /// Remove grants: all, all of one user, or one user's grant on a pattern.
    Reset {
        #[command(flatten)]
        db: DatabaseArg,

        #[arg(short, long, required_unless_present = "all")]
        username: Option<String>,

        #[arg(short, long, requires = "username")]
        topic: Option<String>,

        /// Remove every grant of every user.
        #[arg(long, conflicts_with = "username")]
        all: bool,
    },

    /// Show grants and reservations.
    Access {
        #[command(flatten)]
        db: DatabaseArg,

        /// Only show this user (all users when omitted).
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Issue a bearer token for a user.
    Token {
        #[command(flatten)]
        db: DatabaseArg,

        #[arg(short, long)]
        username: String,
    },

    /// Delete expired tokens.
    PruneTokens {
        #[command(flatten)]
        db: DatabaseArg,
    },

    /// Add a tier.
    TierAdd {
        #[command(flatten)]
        db: DatabaseArg,

        #[command(flatten)]
        tier: TierArgs,
    },

    /// List all tiers.
    TierList {
        #[command(flatten)]
        db: DatabaseArg,
    },

    /// Remove a tier that no user is assigned to.
    TierRemove {
        #[command(flatten)]
        db: DatabaseArg,

        #[arg(short, long)]
        code: String,
    },

    /// Show an argon2 hash for a password (for manual provisioning).
    Hash {
        /// Password to hash.
        password: String,
    },
}

/// Tier limits.
#[derive(Args, Debug, Clone)]
pub struct TierArgs {
    /// Tier code.
    #[arg(short, long)]
    pub code: String,

    /// Display name.
    #[arg(short, long)]
    pub name: String,

    #[arg(long, default_value_t = 0)]
    pub messages_limit: i64,

    /// Message expiry in seconds.
    #[arg(long, default_value_t = 0)]
    pub messages_expiry: u64,

    #[arg(long, default_value_t = 0)]
    pub emails_limit: i64,

    #[arg(long, default_value_t = 0)]
    pub calls_limit: i64,

    #[arg(long, default_value_t = 0)]
    pub reservations_limit: i64,

    /// Attachment file size limit in bytes.
    #[arg(long, default_value_t = 0)]
    pub attachment_file_size_limit: i64,

    /// Attachment total size limit in bytes.
    #[arg(long, default_value_t = 0)]
    pub attachment_total_size_limit: i64,

    /// Attachment expiry in seconds.
    #[arg(long, default_value_t = 0)]
    pub attachment_expiry: u64,
}

impl From<TierArgs> for Tier {
    fn from(args: TierArgs) -> Self {
        Tier {
            messages_limit: args.messages_limit,
            messages_expiry_duration: Duration::from_secs(args.messages_expiry),
            emails_limit: args.emails_limit,
            calls_limit: args.calls_limit,
            reservations_limit: args.reservations_limit,
            attachment_file_size_limit: args.attachment_file_size_limit,
            attachment_total_size_limit: args.attachment_total_size_limit,
            attachment_expiry_duration: Duration::from_secs(args.attachment_expiry),
            ..Tier::new(args.code, args.name)
        }
    }
}

/// User row for display.
#[derive(Tabled, Serialize)]
struct UserDisplay {
    #[tabled(rename = "User")]
    name: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Tier")]
    tier: String,
    #[tabled(rename = "Messages")]
    messages: i64,
    #[tabled(rename = "Emails")]
    emails: i64,
    #[tabled(rename = "Calls")]
    calls: i64,
}

impl From<&User> for UserDisplay {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            role: user.role.to_string(),
            tier: user
                .tier
                .as_ref()
                .map_or_else(|| "-".to_string(), |t| t.code.clone()),
            messages: user.stats.messages,
            emails: user.stats.emails,
            calls: user.stats.calls,
        }
    }
}

/// Grant row for display.
#[derive(Tabled)]
struct GrantDisplay {
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Topic")]
    topic: String,
    #[tabled(rename = "Permission")]
    permission: String,
    #[tabled(rename = "Reserved")]
    reserved: String,
}

#[derive(Tabled)]
struct TierDisplay {
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Messages")]
    messages: i64,
    #[tabled(rename = "Emails")]
    emails: i64,
    #[tabled(rename = "Calls")]
    calls: i64,
    #[tabled(rename = "Reservations")]
    reservations: i64,
    #[tabled(rename = "Attachment")]
    attachment: String,
}

/// Run the auth CLI with the given arguments.
///
/// This is the main entry point for the auth CLI, used by both the
/// standalone binary and the unified pubgate CLI.
pub async fn run(args: AuthArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        AuthCommands::Hash { password } => {
            println!("{}", hash_password(&password, HashCost::default())?);
            Ok(())
        }
        command => {
            let manager = connect(database(&command)).await?;
            let result = dispatch(&manager, command).await;
            manager.close().await;
            result
        }
    }
}

/// Print a command failure to stderr, with a hint for errors an operator can act on.
pub fn report(err: &(dyn std::error::Error + 'static)) {
    eprintln!("Error: {err}");
    if let Some(hint) = hint(err) {
        eprintln!("hint: {hint}");
    }
}

fn hint(err: &(dyn std::error::Error + 'static)) -> Option<&'static str> {
    match err.downcast_ref::<AuthError>()? {
        AuthError::Schema(_) => {
            Some("the user database was left untouched; it may need a newer pubgate")
        }
        AuthError::TierInUse => Some("move users off the tier with `change-tier` first"),
        AuthError::TopicOwnedByOthers => Some("see `access` for current reservations"),
        _ => None,
    }
}

fn database(command: &AuthCommands) -> &str {
    match command {
        AuthCommands::Init { db }
        | AuthCommands::Add { db, .. }
        | AuthCommands::Remove { db, .. }
        | AuthCommands::List { db, .. }
        | AuthCommands::ChangePass { db, .. }
        | AuthCommands::ChangeRole { db, .. }
        | AuthCommands::ChangeTier { db, .. }
        | AuthCommands::Allow { db, .. }
        | AuthCommands::Reset { db, .. }
        | AuthCommands::Access { db, .. }
        | AuthCommands::Token { db, .. }
        | AuthCommands::PruneTokens { db }
        | AuthCommands::TierAdd { db, .. }
        | AuthCommands::TierList { db }
        | AuthCommands::TierRemove { db, .. } => &db.database,
        AuthCommands::Hash { .. } => "",
    }
}

/// Open the store. Creates or migrates the schema as a side effect.
async fn connect(url: &str) -> Result<Manager, Box<dyn std::error::Error>> {
    let config = ManagerConfig::new(url).max_connections(1);
    Ok(Manager::connect(config).await?)
}

async fn dispatch(
    manager: &Manager,
    command: AuthCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        AuthCommands::Init { .. } => {
            println!(
                "User store ready (schema version {}, {} users).",
                crate::sql::SCHEMA_VERSION,
                manager.users_count().await?
            );
        }
        AuthCommands::Add {
            username,
            password,
            role,
            ..
        } => {
            manager.add_user(&username, &password, role).await?;
            println!("User {username} added with role {role}.");
        }
        AuthCommands::Remove { username, .. } => {
            manager.remove_user(&username).await?;
            println!("User {username} removed.");
        }
        AuthCommands::List { format, .. } => list_users(manager, &format).await?,
        AuthCommands::ChangePass {
            username, password, ..
        } => {
            manager.change_password(&username, &password).await?;
            println!("Password of {username} changed.");
        }
        AuthCommands::ChangeRole { username, role, .. } => {
            manager.change_role(&username, role).await?;
            println!("User {username} is now {role}.");
        }
        AuthCommands::ChangeTier {
            username, tier, ..
        } => match tier {
            Some(code) => {
                manager.change_tier(&username, &code).await?;
                println!("User {username} moved to tier {code}.");
            }
            None => {
                manager.reset_tier(&username).await?;
                println!("Tier of {username} removed.");
            }
        },
        AuthCommands::Allow {
            username,
            topic,
            permission,
            ..
        } => {
            manager
                .allow_access(None, &username, &topic, permission)
                .await?;
            println!("Granted {permission} on {topic} to {username}.");
        }
        AuthCommands::Reset {
            username, topic, ..
        } => {
            manager
                .reset_access(username.as_deref(), topic.as_deref())
                .await?;
            println!("Access reset.");
        }
        AuthCommands::Access { username, .. } => show_access(manager, username.as_deref()).await?,
        AuthCommands::Token { username, .. } => {
            let user = manager.user(&username).await?;
            let token = manager.create_token(&user).await?;
            println!("{}", token.value);
            println!("  Expires: {}", format_expires(token.expires));
        }
        AuthCommands::PruneTokens { .. } => {
            let removed = manager.remove_expired_tokens().await?;
            println!("Removed {removed} expired token(s).");
        }
        AuthCommands::TierAdd { tier, .. } => {
            let tier = Tier::from(tier);
            manager.add_tier(&tier).await?;
            println!("Tier {} added.", tier.code);
        }
        AuthCommands::TierList { .. } => list_tiers(manager).await?,
        AuthCommands::TierRemove { code, .. } => {
            manager.remove_tier(&code).await?;
            println!("Tier {code} removed.");
        }
        AuthCommands::Hash { .. } => {}
    }
    Ok(())
}

async fn list_users(manager: &Manager, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let users: Vec<UserDisplay> = manager.users().await?.iter().map(UserDisplay::from).collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&users)?),
        "csv" => {
            println!("name,role,tier,messages,emails,calls");
            for user in users {
                println!(
                    "{},{},{},{},{},{}",
                    user.name, user.role, user.tier, user.messages, user.emails, user.calls
                );
            }
        }
        _ => println!("{}", Table::new(users)),
    }
    Ok(())
}

async fn show_access(
    manager: &Manager,
    username: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let users = match username {
        Some(name) => vec![manager.user(name).await?],
        None => manager.users().await?,
    };

    let mut rows = Vec::new();
    for user in &users {
        if user.is_admin() {
            rows.push(GrantDisplay {
                user: user.name.clone(),
                topic: "*".to_string(),
                permission: "read-write (admin)".to_string(),
                reserved: "-".to_string(),
            });
            continue;
        }
        let reserved: Vec<String> = if user.is_everyone() {
            Vec::new()
        } else {
            manager
                .reservations(&user.name)
                .await?
                .into_iter()
                .map(|r| r.topic)
                .collect()
        };
        for grant in manager.grants(&user.name).await? {
            let is_reserved = reserved.contains(&grant.topic_pattern);
            rows.push(GrantDisplay {
                user: user.name.clone(),
                permission: grant.permission.to_string(),
                reserved: if is_reserved { "Yes" } else { "No" }.to_string(),
                topic: grant.topic_pattern,
            });
        }
    }

    if rows.is_empty() {
        println!("No grants; default access is {}.", manager.default_access());
    } else {
        println!("{}", Table::new(rows));
    }
    Ok(())
}

async fn list_tiers(manager: &Manager) -> Result<(), Box<dyn std::error::Error>> {
    let tiers = manager.tiers().await?;
    if tiers.is_empty() {
        println!("No tiers found.");
        return Ok(());
    }

    let rows: Vec<TierDisplay> = tiers
        .into_iter()
        .map(|t| TierDisplay {
            attachment: format_bytes(t.attachment_file_size_limit),
            code: t.code,
            name: t.name,
            messages: t.messages_limit,
            emails: t.emails_limit,
            calls: t.calls_limit,
            reservations: t.reservations_limit,
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

/// Format bytes to human readable string.
fn format_bytes(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format an expiry timestamp relative to now.
fn format_expires(ts: i64) -> String {
    let remaining = ts - crate::sql::now_unix();
    if remaining <= 0 {
        return "expired".to_string();
    }
    let hours = remaining / 3600;
    let minutes = (remaining % 3600) / 60;
    format!("in {hours}h {minutes}m (unix {ts})")
}
