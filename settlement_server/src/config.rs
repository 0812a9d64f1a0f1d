use std::env;

use chrono::Duration;
use log::*;
use settlement_engine::{
    providers::{
        stripe::DEFAULT_SIGNATURE_TOLERANCE as DEFAULT_STRIPE_TOLERANCE,
        RazorpayAdapter,
        SquareAdapter,
        StripeAdapter,
    },
    sge_api::verification_api::{DEFAULT_IDEMPOTENCY_CLAIM_LEASE, DEFAULT_IDEMPOTENCY_RETENTION},
    ProviderRegistry,
    RetryPolicy,
    DEFAULT_SETTLEMENT_DEADLINE,
};
use sgw_common::{
    helpers::{parse_boolean_flag, parse_positive_number},
    Secret,
};

const DEFAULT_SGW_HOST: &str = "127.0.0.1";
const DEFAULT_SGW_PORT: u16 = 8360;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 25;
const DEFAULT_PROVIDER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
pub const DEFAULT_STRIPE_API_URL: &str = "https://api.stripe.com";
pub const DEFAULT_RAZORPAY_API_URL: &str = "https://api.razorpay.com";
pub const DEFAULT_SQUARE_API_URL: &str = "https://connect.squareup.com";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    /// Run the embedded migrations at startup.
    pub auto_migrate: bool,
    /// Shared token for the operator endpoints. When unset, those endpoints refuse every request.
    pub admin_token: Secret<String>,
    /// The time the webhook path gives the settlement transaction before rolling back and scheduling a retry.
    pub settlement_deadline: std::time::Duration,
    pub retry_policy: RetryPolicy,
    /// How long a client verification response is kept for replays.
    pub idempotency_retention: Duration,
    /// How long an unanswered idempotency claim blocks its key before it is considered abandoned.
    pub idempotency_claim_lease: Duration,
    pub providers: ProvidersConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SGW_HOST.to_string(),
            port: DEFAULT_SGW_PORT,
            database_url: String::default(),
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            auto_migrate: true,
            admin_token: Secret::default(),
            settlement_deadline: DEFAULT_SETTLEMENT_DEADLINE,
            retry_policy: RetryPolicy::default(),
            idempotency_retention: DEFAULT_IDEMPOTENCY_RETENTION,
            idempotency_claim_lease: DEFAULT_IDEMPOTENCY_CLAIM_LEASE,
            providers: ProvidersConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("SGW_HOST").ok().unwrap_or_else(|| DEFAULT_SGW_HOST.into());
        let port = env::var("SGW_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for SGW_PORT. {e} Using the default, {DEFAULT_SGW_PORT}, instead."
                    );
                    DEFAULT_SGW_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_SGW_PORT);
        let database_url = env::var("SGW_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ SGW_DATABASE_URL is not set. Please set it to the URL for the settlement gateway database.");
            String::default()
        });
        let max_connections = parse_positive_number(env::var("SGW_DB_MAX_CONNECTIONS").ok())
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
        let auto_migrate = parse_boolean_flag(env::var("SGW_AUTO_MIGRATE").ok(), true);
        let admin_token = Secret::new(env::var("SGW_ADMIN_TOKEN").ok().unwrap_or_default());
        if !admin_token.is_set() {
            warn!("🪛️ SGW_ADMIN_TOKEN is not set. The operator endpoints are disabled.");
        }
        let settlement_deadline = parse_positive_number(env::var("SGW_SETTLEMENT_TIMEOUT_MS").ok())
            .map(std::time::Duration::from_millis)
            .unwrap_or(DEFAULT_SETTLEMENT_DEADLINE);
        let retry_policy = configure_retry_policy();
        let idempotency_retention =
            env_duration("SGW_IDEMPOTENCY_RETENTION_HOURS", DEFAULT_IDEMPOTENCY_RETENTION, Duration::hours);
        let idempotency_claim_lease =
            env_duration("SGW_IDEMPOTENCY_CLAIM_LEASE_SECS", DEFAULT_IDEMPOTENCY_CLAIM_LEASE, Duration::seconds);
        let providers = ProvidersConfig::from_env_or_defaults();
        Self {
            host,
            port,
            database_url,
            max_connections,
            auto_migrate,
            admin_token,
            settlement_deadline,
            retry_policy,
            idempotency_retention,
            idempotency_claim_lease,
            providers,
        }
    }
}

/// Reads a positive whole number of `unit`s from `name`, logging when the default is used instead.
fn env_duration(name: &str, default: Duration, unit: fn(i64) -> Duration) -> Duration {
    match env::var(name) {
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default value of {}s.", default.num_seconds());
            default
        },
        Ok(s) => match parse_positive_number(Some(s.clone())).and_then(|n| i64::try_from(n).ok()) {
            Some(n) => unit(n),
            None => {
                warn!("🪛️ Invalid configuration value for {name}: {s}. Using {}s instead.", default.num_seconds());
                default
            },
        },
    }
}

fn configure_retry_policy() -> RetryPolicy {
    let defaults = RetryPolicy::default();
    let max_attempts = parse_positive_number(env::var("SGW_RETRY_MAX_ATTEMPTS").ok())
        .and_then(|n| i64::try_from(n).ok())
        .unwrap_or(defaults.max_attempts);
    let batch_size = parse_positive_number(env::var("SGW_RETRY_BATCH_SIZE").ok())
        .and_then(|n| i64::try_from(n).ok())
        .unwrap_or(defaults.batch_size);
    let policy = RetryPolicy {
        delay: env_duration("SGW_RETRY_DELAY_SECS", defaults.delay, Duration::seconds),
        max_attempts,
        poll_interval: env_duration("SGW_RETRY_POLL_SECS", defaults.poll_interval, Duration::seconds),
        batch_size,
        lease: env_duration("SGW_RETRY_LEASE_SECS", defaults.lease, Duration::seconds),
        stale_after: env_duration("SGW_RETRY_STALE_AFTER_SECS", defaults.stale_after, Duration::seconds),
    };
    info!(
        "🪛️ Retry policy: {} attempts, {}s apart. Polling every {}s.",
        policy.max_attempts,
        policy.delay.num_seconds(),
        policy.poll_interval.num_seconds()
    );
    policy
}

//-------------------------------------------------  Providers  -------------------------------------------------------
#[derive(Clone, Debug, Default)]
pub struct ProvidersConfig {
    pub stripe: StripeConfig,
    pub razorpay: RazorpayConfig,
    pub square: SquareConfig,
    /// Timeout for status look-ups against the providers' APIs.
    pub request_timeout: std::time::Duration,
}

#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub webhook_secret: Secret<String>,
    pub api_key: Secret<String>,
    /// `None` disables the timestamp check on webhook signatures.
    pub signature_tolerance: Option<Duration>,
    pub api_url: String,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            webhook_secret: Secret::default(),
            api_key: Secret::default(),
            signature_tolerance: Some(DEFAULT_STRIPE_TOLERANCE),
            api_url: DEFAULT_STRIPE_API_URL.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RazorpayConfig {
    pub webhook_secret: Secret<String>,
    pub key_id: String,
    pub key_secret: Secret<String>,
    pub api_url: String,
}

impl Default for RazorpayConfig {
    fn default() -> Self {
        Self {
            webhook_secret: Secret::default(),
            key_id: String::default(),
            key_secret: Secret::default(),
            api_url: DEFAULT_RAZORPAY_API_URL.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SquareConfig {
    pub signature_key: Secret<String>,
    /// The notification URL exactly as registered with Square. It is part of the signed content.
    pub notification_url: String,
    pub access_token: Secret<String>,
    pub api_url: String,
}

impl Default for SquareConfig {
    fn default() -> Self {
        Self {
            signature_key: Secret::default(),
            notification_url: String::default(),
            access_token: Secret::default(),
            api_url: DEFAULT_SQUARE_API_URL.to_string(),
        }
    }
}

fn secret_from_env(name: &str) -> Secret<String> {
    Secret::new(env::var(name).ok().unwrap_or_default())
}

impl ProvidersConfig {
    pub fn from_env_or_defaults() -> Self {
        let signature_tolerance = match env::var("SGW_STRIPE_SIGNATURE_TOLERANCE_SECS").map(|s| s.trim().to_string()) {
            Ok(s) if s == "0" => {
                warn!("🪛️ Stripe signature timestamps will not be checked. Replayed webhooks will be accepted.");
                None
            },
            Ok(s) => match s.parse::<i64>() {
                Ok(secs) if secs > 0 => Some(Duration::seconds(secs)),
                _ => {
                    warn!("🪛️ Invalid configuration value for SGW_STRIPE_SIGNATURE_TOLERANCE_SECS: {s}");
                    Some(DEFAULT_STRIPE_TOLERANCE)
                },
            },
            Err(_) => Some(DEFAULT_STRIPE_TOLERANCE),
        };
        let stripe = StripeConfig {
            webhook_secret: secret_from_env("SGW_STRIPE_WEBHOOK_SECRET"),
            api_key: secret_from_env("SGW_STRIPE_API_KEY"),
            signature_tolerance,
            api_url: env::var("SGW_STRIPE_API_URL").unwrap_or_else(|_| DEFAULT_STRIPE_API_URL.into()),
        };
        let razorpay = RazorpayConfig {
            webhook_secret: secret_from_env("SGW_RAZORPAY_WEBHOOK_SECRET"),
            key_id: env::var("SGW_RAZORPAY_KEY_ID").ok().unwrap_or_default(),
            key_secret: secret_from_env("SGW_RAZORPAY_KEY_SECRET"),
            api_url: env::var("SGW_RAZORPAY_API_URL").unwrap_or_else(|_| DEFAULT_RAZORPAY_API_URL.into()),
        };
        let square = SquareConfig {
            signature_key: secret_from_env("SGW_SQUARE_SIGNATURE_KEY"),
            notification_url: env::var("SGW_SQUARE_NOTIFICATION_URL").ok().unwrap_or_default(),
            access_token: secret_from_env("SGW_SQUARE_ACCESS_TOKEN"),
            api_url: env::var("SGW_SQUARE_API_URL").unwrap_or_else(|_| DEFAULT_SQUARE_API_URL.into()),
        };
        if square.signature_key.is_set() && square.notification_url.is_empty() {
            error!(
                "🪛️ SGW_SQUARE_SIGNATURE_KEY is set but SGW_SQUARE_NOTIFICATION_URL is not. Square signatures cover \
                 the notification URL, so every Square webhook will fail verification."
            );
        }
        let request_timeout = parse_positive_number(env::var("SGW_PROVIDER_TIMEOUT_MS").ok())
            .map(std::time::Duration::from_millis)
            .unwrap_or(DEFAULT_PROVIDER_TIMEOUT);
        Self { stripe, razorpay, square, request_timeout }
    }

    /// Builds the adapter registry. Only providers with a webhook secret are registered; webhooks for the others are
    /// answered with 404.
    pub fn registry(&self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        if self.stripe.webhook_secret.is_set() {
            registry.register(StripeAdapter::new(self.stripe.signature_tolerance), self.stripe.webhook_secret.clone());
        }
        if self.razorpay.webhook_secret.is_set() {
            registry.register(RazorpayAdapter, self.razorpay.webhook_secret.clone());
        }
        if self.square.signature_key.is_set() {
            registry.register(SquareAdapter::new(&self.square.notification_url), self.square.signature_key.clone());
        }
        if registry.is_empty() {
            warn!("🪛️ No provider webhook secrets are configured. Every webhook will be rejected.");
        }
        registry
    }
}
