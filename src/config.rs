use serde::Deserialize;

const PLACEHOLDER_SECRET: &str = "CHANGE_ME_VPDB_SECRET";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    /// Shared HS256 secret for JSON Web Tokens.
    pub secret: String,
    /// Lifetime of API tokens in seconds. Tokens with exactly this lifetime
    /// are refreshed on every request (sliding session).
    pub api_token_lifetime: i64,
    /// Lifetime of path-bound storage tokens in seconds.
    pub storage_token_lifetime: i64,
    /// Default expiry of personal app tokens, in days.
    pub personal_token_lifetime_days: i64,
    /// TTL for API cache entries and their index sets. `None` keeps entries
    /// until they are invalidated.
    pub api_cache_ttl: Option<u64>,
    /// Plan assigned to newly created users.
    pub default_plan: String,
    /// Exposes `POST /v1/kill` when set (ENABLE_KILL_SWITCH).
    pub enable_kill_switch: bool,
    /// Emit logs as JSON lines.
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: "postgres://localhost/vpdb".into(),
            redis_url: "redis://127.0.0.1:6379".into(),
            secret: PLACEHOLDER_SECRET.into(),
            api_token_lifetime: 3600,
            storage_token_lifetime: 180,
            personal_token_lifetime_days: 365,
            api_cache_ttl: None,
            default_plan: "free".into(),
            enable_kill_switch: false,
            log_json: false,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    let defaults = Config::default();

    let secret = std::env::var("VPDB_SECRET").unwrap_or_else(|_| PLACEHOLDER_SECRET.into());
    if secret == PLACEHOLDER_SECRET {
        let env_mode = std::env::var("VPDB_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "VPDB_SECRET is still the insecure placeholder. \
                 Set a proper secret before running in production."
            );
        }
        eprintln!("⚠️  VPDB_SECRET is not set, using insecure placeholder. Set a real secret for production.");
    }

    let default_plan = std::env::var("VPDB_DEFAULT_PLAN").unwrap_or(defaults.default_plan);
    if crate::models::plan::find(&default_plan).is_none() {
        anyhow::bail!("VPDB_DEFAULT_PLAN '{}' is not a known plan", default_plan);
    }

    Ok(Config {
        port: env_parse("VPDB_PORT", defaults.port),
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
        secret,
        api_token_lifetime: env_parse("VPDB_API_TOKEN_LIFETIME", defaults.api_token_lifetime),
        storage_token_lifetime: env_parse(
            "VPDB_STORAGE_TOKEN_LIFETIME",
            defaults.storage_token_lifetime,
        ),
        personal_token_lifetime_days: env_parse(
            "VPDB_PERSONAL_TOKEN_LIFETIME_DAYS",
            defaults.personal_token_lifetime_days,
        ),
        api_cache_ttl: match env_parse::<u64>("VPDB_API_CACHE_TTL", 0) {
            0 => None,
            ttl => Some(ttl),
        },
        default_plan,
        enable_kill_switch: env_flag("ENABLE_KILL_SWITCH"),
        log_json: env_flag("VPDB_LOG_JSON"),
    })
}
