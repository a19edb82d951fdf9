//! Command line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

use crate::attachments::DEFAULT_MAX_BYTES;
use crate::auth::jwt::{TokenIssuer, DEFAULT_EXPIRY_SECONDS};
use crate::auth::Role;
use crate::db::PoolSettings;
use crate::AppResult;

/// Family records dashboard API.
#[derive(Parser, Debug, Clone)]
#[command(name = "kinboard", version)]
#[command(about = "Personal and family records dashboard")]
pub struct Args {
    /// SQLite database path, or `sqlite::memory:`
    #[arg(long, env = "KINBOARD_DATABASE")]
    pub database: Option<String>,

    /// Address to listen on
    #[arg(long, env = "KINBOARD_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,

    /// HS256 signing secret, at least 32 characters
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value_t = DEFAULT_EXPIRY_SECONDS)]
    pub jwt_expiry_seconds: u64,

    #[arg(long, env = "KINBOARD_POOL_MAX_CONNECTIONS", default_value_t = 8)]
    pub pool_max_connections: u32,

    #[arg(long, env = "KINBOARD_POOL_ACQUIRE_TIMEOUT_SECS", default_value_t = 30)]
    pub pool_acquire_timeout_secs: u64,

    #[arg(long, env = "KINBOARD_STATEMENT_TIMEOUT_SECS", default_value_t = 30)]
    pub statement_timeout_secs: u64,

    /// Largest accepted attachment, in decoded bytes
    #[arg(long, env = "KINBOARD_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_BYTES)]
    pub max_upload_bytes: usize,

    /// Due-reminder poll interval; 0 disables the poller
    #[arg(long, env = "KINBOARD_REMINDER_POLL_SECS", default_value_t = 30)]
    pub reminder_poll_secs: u64,

    #[arg(long, env = "KINBOARD_STATS_TTL_SECS", default_value_t = 10)]
    pub stats_ttl_secs: u64,

    /// Allowed browser origin (any origin when unset)
    #[arg(long, env = "KINBOARD_CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    /// Directory for daily rolling log files
    #[arg(long, env = "KINBOARD_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Allow the built-in development JWT secret
    #[arg(long, env = "KINBOARD_DEV_MODE", default_value_t = false)]
    pub dev_mode: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Apply pending migrations and exit
    Migrate,
    /// Manage user accounts
    #[command(subcommand)]
    User(UserCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    Create(CreateUserArgs),
    Disable {
        #[arg(long)]
        username: String,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CreateUserArgs {
    #[arg(long)]
    pub username: String,
    #[arg(long)]
    pub email: String,
    #[arg(long, env = "KINBOARD_NEW_USER_PASSWORD", hide_env_values = true)]
    pub password: String,
    #[arg(long)]
    pub full_name: Option<String>,
    #[arg(long, value_enum, default_value_t = RoleArg::User)]
    pub role: RoleArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleArg {
    Admin,
    User,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Admin => Role::Admin,
            RoleArg::User => Role::User,
        }
    }
}

pub fn default_database_path() -> PathBuf {
    let base = dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("kinboard").join("kinboard.sqlite3")
}

impl Args {
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.as_deref().map_or(true, str::is_empty) {
            return Err("JWT_SECRET is required unless --dev-mode is set".to_string());
        }
        if !(1..=64).contains(&self.pool_max_connections) {
            return Err("--pool-max-connections must be between 1 and 64".to_string());
        }
        if self.pool_acquire_timeout_secs == 0 {
            return Err("--pool-acquire-timeout-secs must be positive".to_string());
        }
        if self.statement_timeout_secs == 0 {
            return Err("--statement-timeout-secs must be positive".to_string());
        }
        if self.jwt_expiry_seconds == 0 {
            return Err("--jwt-expiry-seconds must be positive".to_string());
        }
        if self.max_upload_bytes == 0 {
            return Err("--max-upload-bytes must be positive".to_string());
        }
        Ok(())
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    pub fn database(&self) -> String {
        self.database
            .clone()
            .unwrap_or_else(|| default_database_path().display().to_string())
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.pool_max_connections,
            acquire_timeout: Duration::from_secs(self.pool_acquire_timeout_secs),
            statement_timeout: Duration::from_secs(self.statement_timeout_secs),
        }
    }

    pub fn reminder_poll_interval(&self) -> Option<Duration> {
        (self.reminder_poll_secs > 0).then(|| Duration::from_secs(self.reminder_poll_secs))
    }

    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_ttl_secs)
    }

    /// A configured secret always wins, even in dev mode.
    pub fn token_issuer(&self) -> AppResult<TokenIssuer> {
        match self.jwt_secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => Ok(TokenIssuer::new(secret.to_string(), self.jwt_expiry_seconds)?),
            None if self.dev_mode => {
                tracing::warn!(target: "kinboard", event = "jwt_dev_secret");
                Ok(TokenIssuer::new_dev(self.jwt_expiry_seconds))
            }
            None => Ok(TokenIssuer::new(String::new(), self.jwt_expiry_seconds)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("kinboard").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn secret_required_outside_dev_mode() {
        let args = parse(&["--jwt-secret", ""]);
        assert!(args.validate().is_err());
        let args = parse(&["--dev-mode"]);
        assert!(args.validate().is_ok());
        assert!(args.token_issuer().is_ok());
    }

    #[test]
    fn out_of_range_values_rejected() {
        let base = ["--dev-mode"];
        for bad in [
            ["--pool-max-connections", "0"],
            ["--pool-max-connections", "65"],
            ["--statement-timeout-secs", "0"],
            ["--max-upload-bytes", "0"],
        ] {
            let args = parse(&[base[0], bad[0], bad[1]]);
            assert!(args.validate().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn subcommands_parse() {
        let args = parse(&["--dev-mode", "migrate"]);
        assert!(matches!(args.command(), Command::Migrate));
        let args = parse(&[
            "user", "create", "--username", "asha", "--email", "a@example.com", "--password",
            "secret1", "--role", "admin",
        ]);
        match args.command() {
            Command::User(UserCommand::Create(create)) => {
                assert_eq!(create.role, RoleArg::Admin);
                assert_eq!(create.full_name, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(matches!(parse(&[]).command(), Command::Serve));
        assert!(!parse(&["--reminder-poll-secs", "0"]).reminder_poll_interval().is_some());
    }
}
