//! Habitual: timezone-aware habit reminders
//!
//! Main binary with subcommands:
//! - `daemon`: Minute ticker driving the broadcast, daily log and reminder jobs
//! - `zones`: List zones currently at a given local time
//! - `send`: Send one manual push to a device or topic
//! - `subscribe`: Sync a stored user's topic subscriptions

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use habitual_push::{
    DEFAULT_FCM_URL, DEFAULT_IID_URL, DryRunGateway, FcmClient, PushGateway, TokenSource,
};
use habitual_scheduler::{
    DEFAULT_MAX_CONCURRENT_SENDS, DEFAULT_MAX_REPLAY_MINUTES, DispatchConfig, LocalTime,
    StalePolicy,
};

mod commands;
mod daemon;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

fn parse_local_time(s: &str) -> Result<LocalTime, String> {
    s.parse().map_err(|e| format!("{}", e))
}

fn parse_minute(s: &str) -> Result<u32, String> {
    match s.trim().parse::<u32>() {
        Ok(m) if m < 60 => Ok(m),
        _ => Err(format!("invalid minute '{}', expected 0-59", s)),
    }
}

/// Parse a `key=value` data entry.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("invalid data entry '{}', expected key=value", s)),
    }
}

#[derive(Parser)]
#[command(name = "habitual")]
#[command(about = "Timezone-aware habit reminder dispatch", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Push provider settings shared by every command that sends.
#[derive(Args, Debug)]
struct PushArgs {
    /// Firebase project id
    #[arg(long, env = "HABITUAL_FCM_PROJECT")]
    fcm_project: Option<String>,

    /// Service account key file; tokens are minted and refreshed from it
    #[arg(long, env = "HABITUAL_FCM_CREDENTIALS")]
    fcm_credentials: Option<PathBuf>,

    /// Pre-issued OAuth access token. It cannot be refreshed and expires
    /// after about an hour, so prefer --fcm-credentials for the daemon.
    #[arg(long, env = "HABITUAL_FCM_ACCESS_TOKEN", hide_env_values = true)]
    fcm_access_token: Option<String>,

    /// Metadata server token endpoint
    #[arg(long, env = "HABITUAL_FCM_METADATA_URL")]
    fcm_metadata_url: Option<String>,

    /// FCM API origin
    #[arg(long, env = "HABITUAL_FCM_URL", default_value = DEFAULT_FCM_URL)]
    fcm_url: String,

    /// Instance ID API origin (topic membership)
    #[arg(long, env = "HABITUAL_IID_URL", default_value = DEFAULT_IID_URL)]
    iid_url: String,

    /// Log pushes instead of sending them.
    /// Accepts "1", "true", "yes", or "on".
    #[arg(long, env = "HABITUAL_DRY_RUN", value_parser = parse_bool_env, default_value = "false")]
    dry_run: bool,
}

impl PushArgs {
    fn gateway(&self) -> Result<Arc<dyn PushGateway>> {
        if self.dry_run {
            tracing::info!("dry run: pushes will be logged, not sent");
            return Ok(Arc::new(DryRunGateway));
        }

        let project = self.fcm_project.as_deref().ok_or_else(|| {
            miette::miette!("--fcm-project (HABITUAL_FCM_PROJECT) is required unless --dry-run is set")
        })?;

        let client = FcmClient::new(project, self.token_source()?)
            .map_err(|e| miette::miette!("failed to create FCM client: {}", e))?
            .with_fcm_url(&self.fcm_url)
            .with_iid_url(&self.iid_url);
        Ok(Arc::new(client))
    }

    /// Credentials file, then static token, then the metadata server.
    fn token_source(&self) -> Result<TokenSource> {
        if let Some(path) = &self.fcm_credentials {
            return TokenSource::service_account_file(path)
                .map_err(|e| miette::miette!("failed to load FCM credentials: {}", e));
        }

        match (&self.fcm_access_token, &self.fcm_metadata_url) {
            (Some(token), _) if !token.is_empty() => {
                tracing::warn!(
                    "using a static FCM access token; sends fail once it expires (about an hour)"
                );
                Ok(TokenSource::Static(token.clone()))
            }
            (_, Some(url)) => Ok(TokenSource::Metadata { url: url.clone() }),
            _ => Ok(TokenSource::metadata()),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatch daemon until interrupted
    Daemon {
        /// SQLite database path
        #[arg(long, env = "HABITUAL_DATABASE", default_value = "habitual.db")]
        database: String,

        #[command(flatten)]
        push: PushArgs,

        /// Local time of the per-kind topic broadcast (HH:MM)
        #[arg(long, env = "HABITUAL_BROADCAST_TIME", value_parser = parse_local_time, default_value = "06:30")]
        broadcast_time: LocalTime,

        /// Local time of the daily log reminder (HH:MM)
        #[arg(long, env = "HABITUAL_DAILY_LOG_TIME", value_parser = parse_local_time, default_value = "20:00")]
        daily_log_time: LocalTime,

        /// Minute of each hour at which challenge reminders are evaluated
        #[arg(long, env = "HABITUAL_REMINDER_MINUTE", value_parser = parse_minute, default_value = "0")]
        reminder_minute: u32,

        /// Maximum concurrent push requests per job run
        #[arg(long, env = "HABITUAL_MAX_CONCURRENT_SENDS", default_value_t = DEFAULT_MAX_CONCURRENT_SENDS)]
        max_concurrent_sends: usize,

        /// Missed minutes replayed after the process falls behind
        #[arg(long, env = "HABITUAL_MAX_REPLAY_MINUTES", default_value_t = DEFAULT_MAX_REPLAY_MINUTES)]
        max_replay_minutes: u32,

        /// Comma-separated timezone list (defaults to the full tz database)
        #[arg(long, env = "HABITUAL_TIMEZONES")]
        timezones: Option<String>,
    },

    /// List timezones whose local time is currently HH:MM
    Zones {
        /// Local time to look for (HH:MM)
        #[arg(long, value_parser = parse_local_time)]
        at: LocalTime,

        /// Comma-separated timezone list (defaults to the full tz database)
        #[arg(long, env = "HABITUAL_TIMEZONES")]
        timezones: Option<String>,
    },

    /// Send one push notification to a device or a topic
    Send {
        #[command(flatten)]
        push: PushArgs,

        /// Device registration token
        #[arg(long, conflicts_with = "topic", required_unless_present = "topic")]
        token: Option<String>,

        /// Topic name
        #[arg(long)]
        topic: Option<String>,

        /// Notification title
        #[arg(long)]
        title: String,

        /// Notification body
        #[arg(long)]
        body: String,

        /// Extra data entries (key=value, repeatable)
        #[arg(long = "data", value_parser = parse_key_val)]
        data: Vec<(String, String)>,
    },

    /// Subscribe a stored user's device to every topic for their timezone
    Subscribe {
        /// SQLite database path
        #[arg(long, env = "HABITUAL_DATABASE", default_value = "habitual.db")]
        database: String,

        #[command(flatten)]
        push: PushArgs,

        /// User id
        #[arg(long)]
        user: String,

        /// Timezone the user's device was previously subscribed under
        #[arg(long)]
        previous_timezone: Option<String>,

        /// Device token the user previously had
        #[arg(long)]
        previous_token: Option<String>,

        /// What to do with the previous subscriptions (prune or keep)
        #[arg(long, env = "HABITUAL_STALE_SUBSCRIPTIONS", default_value = "prune")]
        stale: StalePolicy,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "habitual=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            database,
            push,
            broadcast_time,
            daily_log_time,
            reminder_minute,
            max_concurrent_sends,
            max_replay_minutes,
            timezones,
        } => {
            let config = daemon::DaemonConfig {
                database,
                timezones,
                dispatch: DispatchConfig {
                    broadcast_time,
                    daily_log_time,
                    reminder_minute,
                    max_concurrent_sends,
                    max_replay_minutes,
                },
            };
            daemon::run(config, push.gateway()?).await
        }

        Commands::Zones { at, timezones } => commands::zones(at, timezones.as_deref()),

        Commands::Send {
            push,
            token,
            topic,
            title,
            body,
            data,
        } => {
            let target = match (token, topic) {
                (Some(token), _) => habitual_push::Target::Token(token),
                (None, Some(topic)) => habitual_push::Target::Topic(topic),
                (None, None) => return Err(miette::miette!("either --token or --topic is required")),
            };
            commands::send(push.gateway()?, target, &title, &body, data).await
        }

        Commands::Subscribe {
            database,
            push,
            user,
            previous_timezone,
            previous_token,
            stale,
        } => {
            commands::subscribe(
                &database,
                push.gateway()?,
                &user,
                previous_timezone,
                previous_token,
                stale,
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test_case("1", true)]
    #[test_case("TRUE", true)]
    #[test_case("yes", true)]
    #[test_case("on", true)]
    #[test_case("0", false)]
    #[test_case("false", false)]
    #[test_case("Off", false)]
    #[test_case("", false)]
    fn test_parse_bool_env(input: &str, expected: bool) {
        assert_eq!(parse_bool_env(input), Ok(expected));
    }

    #[test]
    fn test_parse_bool_env_rejects_garbage() {
        assert!(parse_bool_env("maybe").is_err());
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("type=manual"),
            Ok(("type".to_string(), "manual".to_string()))
        );
        assert_eq!(
            parse_key_val("url=https://x?a=b"),
            Ok(("url".to_string(), "https://x?a=b".to_string()))
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=value").is_err());
    }

    #[test]
    fn test_parse_minute() {
        assert_eq!(parse_minute("0"), Ok(0));
        assert_eq!(parse_minute("59"), Ok(59));
        assert!(parse_minute("60").is_err());
    }

    #[test]
    fn test_send_requires_exactly_one_target() {
        let both = Cli::try_parse_from([
            "habitual", "send", "--dry-run", "true", "--token", "t", "--topic", "x", "--title",
            "a", "--body", "b",
        ]);
        assert!(both.is_err());

        let neither =
            Cli::try_parse_from(["habitual", "send", "--title", "a", "--body", "b"]);
        assert!(neither.is_err());

        let topic = Cli::try_parse_from([
            "habitual", "send", "--topic", "ninety_UTC", "--title", "a", "--body", "b", "--data",
            "type=manual",
        ]);
        assert!(topic.is_ok());
    }

    #[test]
    fn test_zones_parses_local_time() {
        let cli = Cli::try_parse_from(["habitual", "zones", "--at", "06:30"]).unwrap();
        match cli.command {
            Commands::Zones { at, .. } => assert_eq!(at.to_string(), "06:30"),
            _ => panic!("expected zones command"),
        }

        assert!(Cli::try_parse_from(["habitual", "zones", "--at", "25:00"]).is_err());
    }

    fn push_args() -> PushArgs {
        PushArgs {
            fcm_project: None,
            fcm_credentials: None,
            fcm_access_token: None,
            fcm_metadata_url: None,
            fcm_url: DEFAULT_FCM_URL.to_string(),
            iid_url: DEFAULT_IID_URL.to_string(),
            dry_run: false,
        }
    }

    #[test]
    fn test_dry_run_gateway_needs_no_project() {
        let args = PushArgs {
            dry_run: true,
            ..push_args()
        };
        assert!(args.gateway().is_ok());

        let args = PushArgs {
            dry_run: false,
            ..args
        };
        assert!(args.gateway().is_err());
    }

    #[test]
    fn test_token_source_precedence() {
        let args = PushArgs {
            fcm_access_token: Some("static".to_string()),
            fcm_metadata_url: Some("http://localhost/token".to_string()),
            ..push_args()
        };
        assert!(matches!(args.token_source(), Ok(TokenSource::Static(t)) if t == "static"));

        let args = PushArgs {
            fcm_access_token: Some(String::new()),
            ..args
        };
        assert!(matches!(
            args.token_source(),
            Ok(TokenSource::Metadata { url }) if url == "http://localhost/token"
        ));

        assert!(matches!(
            push_args().token_source(),
            Ok(TokenSource::Metadata { url }) if url == habitual_push::DEFAULT_METADATA_TOKEN_URL
        ));
    }

    #[test]
    fn test_credentials_file_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let args = PushArgs {
            fcm_credentials: Some(dir.path().join("missing.json")),
            fcm_access_token: Some("static".to_string()),
            ..push_args()
        };
        // The static token is not used as a fallback for a broken key file.
        assert!(args.token_source().is_err());
    }

    #[test]
    fn test_credentials_flag_parses() {
        let cli = Cli::try_parse_from([
            "habitual",
            "send",
            "--fcm-credentials",
            "/etc/habitual/service-account.json",
            "--topic",
            "ninety_UTC",
            "--title",
            "a",
            "--body",
            "b",
        ])
        .unwrap();
        match cli.command {
            Commands::Send { push, .. } => assert_eq!(
                push.fcm_credentials,
                Some(PathBuf::from("/etc/habitual/service-account.json"))
            ),
            _ => panic!("expected send command"),
        }
    }
}
