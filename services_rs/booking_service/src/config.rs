use busline_common::secret_policy::{check_secret, DeployEnv};
use regex::Regex;
use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub env_name: String,

    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub max_seats_per_booking: usize,

    pub db_url: String,
    pub db_schema: Option<String>,

    pub require_gateway_secret: bool,
    pub gateway_secret: Option<String>,
    pub gateway_allowed_callers: Vec<String>,
    pub service_id: String,

    pub allowed_origins: Vec<String>,

    pub notify_base_url: Option<String>,
    pub notify_internal_secret: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

// "postgresql+asyncpg://..." -> "postgresql://..."
fn normalize_db_url(raw: &str) -> String {
    if let Some(colon) = raw.find(':') {
        let (scheme, rest) = raw.split_at(colon);
        if let Some(plus) = scheme.find('+') {
            return format!("{}{}", &scheme[..plus], rest);
        }
    }
    raw.to_string()
}

fn validate_postgres_url(url: &str) -> Result<(), String> {
    let scheme = url
        .split_once(':')
        .map(|(s, _)| s.trim().to_lowercase())
        .unwrap_or_default();
    match scheme.as_str() {
        "postgres" | "postgresql" => Ok(()),
        _ => Err("BOOKING_DB_URL (or DB_URL) must be a postgres URL".to_string()),
    }
}

fn parse_bool_like(raw: &str) -> Option<bool> {
    let v = raw.trim().to_lowercase();
    if v.is_empty() {
        return None;
    }
    Some(!matches!(v.as_str(), "0" | "false" | "no" | "off"))
}

fn parse_clamped(key: &str, default: usize, min: usize, max: usize) -> Result<usize, String> {
    let raw = env_or(key, &default.to_string());
    let v: usize = raw
        .trim()
        .parse()
        .map_err(|_| format!("{key} must be an integer"))?;
    Ok(v.clamp(min, max))
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let env_name = env_or("ENV", "dev");
        let deploy_env = DeployEnv::parse(&env_name);
        let prod_like = deploy_env.is_production_like();

        let host = env_or("APP_HOST", "0.0.0.0");
        let port: u16 = env_or("APP_PORT", "5000")
            .parse()
            .map_err(|_| "APP_PORT must be a valid u16".to_string())?;

        let db_raw = env_opt("BOOKING_DB_URL")
            .or_else(|| env_opt("DB_URL"))
            .unwrap_or_else(|| "postgresql://busline:busline@db:5432/busline".to_string());
        let db_url = normalize_db_url(&db_raw);
        validate_postgres_url(&db_url)?;

        let db_schema = env_opt("DB_SCHEMA");
        if let Some(s) = &db_schema {
            let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(|e| e.to_string())?;
            if !re.is_match(s) {
                return Err("DB_SCHEMA must match ^[A-Za-z_][A-Za-z0-9_]*$".to_string());
            }
        }

        let require_gateway_secret =
            parse_bool_like(&env_or("BOOKING_REQUIRE_GATEWAY_SECRET", "")).unwrap_or(prod_like);
        if prod_like && !require_gateway_secret {
            return Err("BOOKING_REQUIRE_GATEWAY_SECRET must be true in prod/staging".to_string());
        }

        let gateway_secret = env_opt("BOOKING_GATEWAY_SECRET");
        if require_gateway_secret && gateway_secret.is_none() {
            return Err(
                "BOOKING_GATEWAY_SECRET must be set when BOOKING_REQUIRE_GATEWAY_SECRET is enabled"
                    .to_string(),
            );
        }
        check_secret(
            deploy_env,
            "BOOKING_GATEWAY_SECRET",
            gateway_secret.as_deref(),
            false,
        )?;

        let mut gateway_allowed_callers =
            parse_csv(&env_or("BOOKING_GATEWAY_ALLOWED_CALLERS", ""))
                .into_iter()
                .map(|v| v.to_ascii_lowercase())
                .collect::<Vec<_>>();
        if gateway_allowed_callers.is_empty() && prod_like {
            gateway_allowed_callers = vec!["gateway".to_string()];
        }

        let service_id = env_or("BOOKING_SERVICE_ID", "booking")
            .trim()
            .to_ascii_lowercase();
        if service_id.is_empty()
            || service_id.len() > 64
            || !service_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err("BOOKING_SERVICE_ID must be 1..64 [A-Za-z0-9-_.]".to_string());
        }

        let mut allowed_origins = parse_csv(&env_or("ALLOWED_ORIGINS", ""));
        if allowed_origins.is_empty() {
            allowed_origins = vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ];
        }
        if prod_like && allowed_origins.iter().any(|o| o == "*") {
            return Err("ALLOWED_ORIGINS must not contain '*' in prod/staging".to_string());
        }
        if prod_like && allowed_origins.iter().any(|o| !o.starts_with("https://")) {
            return Err("ALLOWED_ORIGINS must use https:// origins in prod/staging".to_string());
        }

        let max_body_bytes =
            parse_clamped("BOOKING_MAX_BODY_BYTES", 1024 * 1024, 16 * 1024, 10 * 1024 * 1024)?;
        let max_seats_per_booking = parse_clamped("BOOKING_MAX_SEATS", 10, 1, 50)?;

        let notify_base_url = env_opt("NOTIFY_BASE_URL");
        let notify_internal_secret = env_opt("NOTIFY_INTERNAL_SECRET");
        if notify_base_url.is_some() && prod_like && notify_internal_secret.is_none() {
            return Err(
                "NOTIFY_INTERNAL_SECRET must be set when NOTIFY_BASE_URL is configured"
                    .to_string(),
            );
        }
        check_secret(
            deploy_env,
            "NOTIFY_INTERNAL_SECRET",
            notify_internal_secret.as_deref(),
            false,
        )?;

        Ok(Self {
            env_name,
            host,
            port,
            max_body_bytes,
            max_seats_per_booking,
            db_url,
            db_schema,
            require_gateway_secret,
            gateway_secret,
            gateway_allowed_callers,
            service_id,
            allowed_origins,
            notify_base_url,
            notify_internal_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const KEYS: &[&str] = &[
        "ENV",
        "APP_PORT",
        "BOOKING_DB_URL",
        "DB_URL",
        "DB_SCHEMA",
        "BOOKING_REQUIRE_GATEWAY_SECRET",
        "BOOKING_GATEWAY_SECRET",
        "BOOKING_GATEWAY_ALLOWED_CALLERS",
        "BOOKING_SERVICE_ID",
        "ALLOWED_ORIGINS",
        "BOOKING_MAX_BODY_BYTES",
        "BOOKING_MAX_SEATS",
        "NOTIFY_BASE_URL",
        "NOTIFY_INTERNAL_SECRET",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            let saved = KEYS
                .iter()
                .map(|k| {
                    let existing = env::var(k).ok();
                    env::remove_var(k);
                    (k.to_string(), existing)
                })
                .collect();
            Self { saved }
        }

        fn prod() -> Self {
            let g = Self::new();
            env::set_var("ENV", "prod");
            env::set_var("BOOKING_DB_URL", "postgresql://u:p@localhost:5432/busline");
            env::set_var("BOOKING_GATEWAY_SECRET", "cccccccccccccccccccccccccccccccc");
            env::set_var("ALLOWED_ORIGINS", "https://tickets.busline.example");
            g
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (k, v) in self.saved.drain(..) {
                match v {
                    Some(val) => env::set_var(k, val),
                    None => env::remove_var(k),
                }
            }
        }
    }

    fn lock() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn dev_defaults() {
        let _g = lock();
        let _env = EnvGuard::new();

        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.port, 5000);
        assert!(!cfg.require_gateway_secret);
        assert!(cfg.gateway_allowed_callers.is_empty());
        assert_eq!(cfg.service_id, "booking");
        assert_eq!(cfg.max_seats_per_booking, 10);
        assert_eq!(cfg.db_url, "postgresql://busline:busline@db:5432/busline");
        assert!(cfg.notify_base_url.is_none());
    }

    #[test]
    fn rejects_non_postgres_url() {
        let _g = lock();
        let _env = EnvGuard::new();
        env::set_var("BOOKING_DB_URL", "sqlite:////tmp/booking.db");

        let err = Config::from_env().expect_err("sqlite must be rejected");
        assert!(err.contains("postgres"));
    }

    #[test]
    fn strips_driver_suffix_and_falls_back_to_db_url() {
        let _g = lock();
        let _env = EnvGuard::new();
        env::set_var("DB_URL", "postgresql+asyncpg://u:p@db:5432/busline");

        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.db_url, "postgresql://u:p@db:5432/busline");
    }

    #[test]
    fn rejects_unsafe_schema_name() {
        let _g = lock();
        let _env = EnvGuard::new();
        env::set_var("DB_SCHEMA", "booking; drop table bookings");

        assert!(Config::from_env().is_err());
    }

    #[test]
    fn prod_defaults_to_gateway_caller() {
        let _g = lock();
        let _env = EnvGuard::prod();

        let cfg = Config::from_env().expect("config");
        assert!(cfg.require_gateway_secret);
        assert_eq!(cfg.gateway_allowed_callers, vec!["gateway".to_string()]);
    }

    #[test]
    fn prod_rejects_gateway_secret_toggle_off() {
        let _g = lock();
        let _env = EnvGuard::prod();
        env::set_var("BOOKING_REQUIRE_GATEWAY_SECRET", "false");

        let err = Config::from_env().expect_err("must reject disabled gateway secret");
        assert!(err.contains("BOOKING_REQUIRE_GATEWAY_SECRET must be true"));
    }

    #[test]
    fn prod_rejects_weak_gateway_secret() {
        let _g = lock();
        let _env = EnvGuard::prod();
        env::set_var("BOOKING_GATEWAY_SECRET", "change-me-gateway-secret");

        let err = Config::from_env().expect_err("placeholder secret");
        assert!(err.contains("BOOKING_GATEWAY_SECRET"));
    }

    #[test]
    fn prod_rejects_non_https_allowed_origins() {
        let _g = lock();
        let _env = EnvGuard::prod();
        env::set_var("ALLOWED_ORIGINS", "http://tickets.busline.example");

        let err = Config::from_env().expect_err("non-https origins");
        assert!(err.contains("ALLOWED_ORIGINS must use https:// origins"));
    }

    #[test]
    fn prod_requires_notify_secret_when_notifications_enabled() {
        let _g = lock();
        let _env = EnvGuard::prod();
        env::set_var("NOTIFY_BASE_URL", "http://notify:8090");

        let err = Config::from_env().expect_err("missing notify secret");
        assert!(err.contains("NOTIFY_INTERNAL_SECRET"));

        env::set_var("NOTIFY_INTERNAL_SECRET", "dddddddddddddddddddddddddddddddd");
        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.notify_base_url.as_deref(), Some("http://notify:8090"));
    }

    #[test]
    fn limits_are_clamped_to_safe_bounds() {
        let _g = lock();
        let _env = EnvGuard::new();

        env::set_var("BOOKING_MAX_BODY_BYTES", "1");
        env::set_var("BOOKING_MAX_SEATS", "0");
        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.max_body_bytes, 16 * 1024);
        assert_eq!(cfg.max_seats_per_booking, 1);

        env::set_var("BOOKING_MAX_BODY_BYTES", "999999999");
        env::set_var("BOOKING_MAX_SEATS", "500");
        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.max_seats_per_booking, 50);

        env::set_var("BOOKING_MAX_SEATS", "many");
        assert!(Config::from_env().is_err());
    }
}
