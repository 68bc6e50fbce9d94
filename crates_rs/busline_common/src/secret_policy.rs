/// Deployment tier derived from the `ENV` variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeployEnv {
    Dev,
    Test,
    Staging,
    Prod,
}

impl DeployEnv {
    /// Unknown names are treated as dev.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            "test" => Self::Test,
            _ => Self::Dev,
        }
    }

    pub fn is_production_like(self) -> bool {
        matches!(self, Self::Prod | Self::Staging)
    }
}

const MIN_SECRET_LEN: usize = 16;

const PLACEHOLDERS: &[&str] = &[
    "changeme", "secret", "password", "default", "dummy", "example", "test", "qwerty",
];

const PLACEHOLDER_FRAGMENTS: &[&str] = &[
    "change-me",
    "change_me",
    "replace-me",
    "replace_me",
    "your-secret",
    "your_secret",
    "dev-secret",
    "dev_secret",
    "set-me",
];

fn looks_like_placeholder(secret: &str) -> bool {
    let s = secret.to_ascii_lowercase();
    PLACEHOLDERS.contains(&s.as_str()) || PLACEHOLDER_FRAGMENTS.iter().any(|f| s.contains(f))
}

/// Rejects missing, short or placeholder secrets in production-like tiers. Local tiers
/// accept anything.
pub fn check_secret(
    env: DeployEnv,
    key: &str,
    value: Option<&str>,
    required_in_prod: bool,
) -> Result<(), String> {
    if !env.is_production_like() {
        return Ok(());
    }

    let secret = value.map(str::trim).unwrap_or("");
    if secret.is_empty() {
        if required_in_prod {
            return Err(format!("{key} must be set in prod/staging"));
        }
        return Ok(());
    }
    if secret.len() < MIN_SECRET_LEN {
        return Err(format!(
            "{key} must be at least {MIN_SECRET_LEN} characters in prod/staging"
        ));
    }
    if looks_like_placeholder(secret) {
        return Err(format!(
            "{key} looks like a placeholder value; use a strong random secret"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parsing() {
        assert_eq!(DeployEnv::parse("Production"), DeployEnv::Prod);
        assert_eq!(DeployEnv::parse(" staging "), DeployEnv::Staging);
        assert_eq!(DeployEnv::parse("test"), DeployEnv::Test);
        assert_eq!(DeployEnv::parse("qa"), DeployEnv::Dev);
        assert!(DeployEnv::Staging.is_production_like());
        assert!(!DeployEnv::Test.is_production_like());
    }

    #[test]
    fn local_tiers_skip_validation() {
        assert!(check_secret(DeployEnv::Dev, "BOOKING_GATEWAY_SECRET", Some("x"), true).is_ok());
        assert!(check_secret(DeployEnv::Test, "BOOKING_GATEWAY_SECRET", None, true).is_ok());
    }

    #[test]
    fn prod_rejects_missing_when_required() {
        let err = check_secret(DeployEnv::Prod, "BOOKING_GATEWAY_SECRET", Some("  "), true)
            .expect_err("missing secret");
        assert!(err.contains("must be set"));
        assert!(check_secret(DeployEnv::Prod, "NOTIFY_INTERNAL_SECRET", None, false).is_ok());
    }

    #[test]
    fn prod_rejects_short_and_placeholder_secrets() {
        assert!(check_secret(DeployEnv::Prod, "K", Some("short"), true).is_err());
        assert!(check_secret(DeployEnv::Prod, "K", Some("please-change-me-now-1234"), true).is_err());
        assert!(check_secret(DeployEnv::Prod, "K", Some("p9s7Qk_4w-vN2xT8kP6m"), true).is_ok());
    }
}
