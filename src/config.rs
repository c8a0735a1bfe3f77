use std::fmt;
use std::path::PathBuf;

use anyhow::Context;

pub const DEFAULT_VAPID_SUBJECT: &str = "mailto:notificaciones@sekcalendar.app";

/// Process-wide settings, read from flags or the environment.
#[derive(Clone, Default, clap::Args)]
pub struct Settings {
    /// Postgres connection string for the subscription store
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,
    /// Public VAPID key handed to browsers when they subscribe
    #[arg(long, env = "VAPID_PUBLIC_KEY", global = true)]
    pub vapid_public_key: Option<String>,
    /// Private VAPID key (URL-safe base64) used to sign pushes
    #[arg(long, env = "VAPID_PRIVATE_KEY", global = true, hide_env_values = true)]
    pub vapid_private_key: Option<String>,
    #[arg(long, env = "VAPID_SUBJECT", global = true, default_value = DEFAULT_VAPID_SUBJECT)]
    pub vapid_subject: String,
    /// Bearer token the scheduler must present to trigger sends
    #[arg(long, env = "CRON_SECRET", global = true, hide_env_values = true)]
    pub cron_secret: Option<String>,
    /// CSV of `date,kind,label` rows layered over the built-in exceptions
    #[arg(long, env = "EXCEPTIONS_CSV", global = true)]
    pub exceptions: Option<PathBuf>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Settings {
    pub fn database_url(&self) -> anyhow::Result<&str> {
        non_empty(&self.database_url)
            .context("DATABASE_URL must be set to a production Postgres instance")
    }

    pub fn vapid_public_key(&self) -> Option<&str> {
        non_empty(&self.vapid_public_key)
    }

    pub fn vapid_private_key(&self) -> anyhow::Result<&str> {
        non_empty(&self.vapid_private_key).context("VAPID_PRIVATE_KEY must be set to send pushes")
    }

    pub fn cron_secret(&self) -> Option<&str> {
        non_empty(&self.cron_secret)
    }

    /// `Authorization` must be exactly `Bearer <secret>`; with no secret configured nothing passes.
    pub fn is_authorized(&self, authorization: Option<&str>) -> bool {
        match (self.cron_secret(), authorization) {
            (Some(secret), Some(header)) => header
                .strip_prefix("Bearer ")
                .is_some_and(|token| token == secret),
            _ => false,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |value: &Option<String>| non_empty(value).map(|_| "<redacted>");
        f.debug_struct("Settings")
            .field("database_url", &redacted(&self.database_url))
            .field("vapid_public_key", &self.vapid_public_key())
            .field("vapid_private_key", &redacted(&self.vapid_private_key))
            .field("vapid_subject", &self.vapid_subject)
            .field("cron_secret", &redacted(&self.cron_secret))
            .field("exceptions", &self.exceptions)
            .finish()
    }
}
