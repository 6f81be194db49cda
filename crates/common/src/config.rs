use std::fmt;
use std::str::FromStr;

use chrono_tz::Tz;

/// Default TTL handed to push services: four weeks, the longest most of them honour.
const DEFAULT_PUSH_TTL_SECONDS: u32 = 2_419_200;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Socket address the API server binds to (default: 0.0.0.0:3000)
    pub bind_addr: String,

    /// Shared secret expected in the `x-api-key` header of broadcast routes
    pub api_key: String,

    /// VAPID credentials used to sign push requests
    pub vapid: VapidConfig,

    /// Fan-out tuning
    pub broadcast: BroadcastConfig,

    /// Holiday calendar; `None` disables the holiday gate
    pub calendar: Option<CalendarConfig>,
}

/// VAPID key pair and contact identifier (RFC 8292).
#[derive(Clone)]
pub struct VapidConfig {
    /// Uncompressed P-256 public key, base64url. Handed to browsers as `applicationServerKey`.
    pub public_key: String,

    /// Raw P-256 private key, base64url.
    pub private_key: String,

    /// `mailto:` or `https:` contact placed in the JWT `sub` claim.
    pub subject: String,
}

impl fmt::Debug for VapidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VapidConfig")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("subject", &self.subject)
            .finish()
    }
}

/// Settings for one broadcast run.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Maximum number of deliveries in flight at once (1 = sequential)
    pub concurrency: usize,

    /// TTL attached to every push message, in seconds
    pub ttl_seconds: u32,

    /// Upper bound for a single delivery attempt, in milliseconds
    pub delivery_timeout_ms: u64,

    /// Overall budget for one broadcast run, in seconds; `None` means unbounded
    pub deadline_secs: Option<u64>,

    /// Message sent by the scheduled trigger when the request carries no body
    pub default_message: Option<String>,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            ttl_seconds: DEFAULT_PUSH_TTL_SECONDS,
            delivery_timeout_ms: 10_000,
            deadline_secs: None,
            default_message: None,
        }
    }
}

/// Public holiday calendar consulted before scheduled broadcasts.
#[derive(Debug, Clone)]
pub struct CalendarConfig {
    /// Google Calendar API key
    pub api_key: String,

    /// Calendar identifier, e.g. `ko.south_korea#holiday@group.v.calendar.google.com`
    pub calendar_id: String,

    /// Timezone that defines "today" (default: Asia/Seoul)
    pub timezone: Tz,

    /// What to do when the calendar cannot be queried
    pub failure_policy: CalendarFailurePolicy,
}

/// Behaviour of the holiday gate when the calendar query itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalendarFailurePolicy {
    /// Skip the broadcast.
    #[default]
    FailClosed,
    /// Send anyway.
    FailOpen,
}

impl FromStr for CalendarFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" | "fail_closed" | "closed" => Ok(Self::FailClosed),
            "send" | "fail_open" | "open" => Ok(Self::FailOpen),
            other => Err(format!(
                "unknown calendar failure policy '{}', expected 'skip' or 'send'",
                other
            )),
        }
    }
}

impl fmt::Display for CalendarFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalendarFailurePolicy::FailClosed => write!(f, "skip"),
            CalendarFailurePolicy::FailOpen => write!(f, "send"),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            var(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("{} environment variable is required", name))
        };

        let vapid = VapidConfig {
            public_key: required("VAPID_PUBLIC_KEY")?,
            private_key: required("VAPID_PRIVATE_KEY")?,
            subject: required("VAPID_SUBJECT")?,
        };

        let defaults = BroadcastConfig::default();
        let broadcast = BroadcastConfig {
            concurrency: parse_or(&var, "BROADCAST_CONCURRENCY", defaults.concurrency)?.max(1),
            ttl_seconds: parse_or(&var, "PUSH_TTL_SECONDS", defaults.ttl_seconds)?,
            delivery_timeout_ms: parse_or(
                &var,
                "DELIVERY_TIMEOUT_MS",
                defaults.delivery_timeout_ms,
            )?,
            deadline_secs: match var("BROADCAST_DEADLINE_SECS").filter(|v| !v.trim().is_empty()) {
                Some(raw) => Some(raw.trim().parse::<u64>().map_err(|e| {
                    anyhow::anyhow!("BROADCAST_DEADLINE_SECS is invalid: {}", e)
                })?),
                None => None,
            },
            default_message: var("BROADCAST_DEFAULT_MESSAGE").filter(|v| !v.is_empty()),
        };

        let calendar = match (
            var("GOOGLE_CALENDAR_API_KEY").filter(|v| !v.is_empty()),
            var("GOOGLE_CALENDAR_ID").filter(|v| !v.is_empty()),
        ) {
            (Some(api_key), Some(calendar_id)) => Some(CalendarConfig {
                api_key,
                calendar_id,
                timezone: parse_or(&var, "CALENDAR_TIMEZONE", chrono_tz::Asia::Seoul)?,
                failure_policy: parse_or(
                    &var,
                    "HOLIDAY_CALENDAR_FAILURE",
                    CalendarFailurePolicy::default(),
                )?,
            }),
            (None, None) => None,
            _ => {
                return Err(anyhow::anyhow!(
                    "GOOGLE_CALENDAR_API_KEY and GOOGLE_CALENDAR_ID must be set together"
                ));
            }
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_max_connections: parse_or(&var, "DB_MAX_CONNECTIONS", 20)?,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            api_key: required("API_KEY")?,
            vapid,
            broadcast,
            calendar,
        })
    }
}

fn parse_or<F, T>(var: &F, name: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match var(name).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", name, e)),
        None => Ok(default),
    }
}
