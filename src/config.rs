use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Self::Development,
            _ => Self::Production,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub expires_in_minutes: i64,
    pub cookie_expires_in_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub from: String,
    /// No endpoint means mails are only logged.
    pub api_url: Option<String>,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub env: Environment,
    /// `postgres://…` or `memory://` for the in-process store.
    pub database_url: String,
    pub jwt: JwtConfig,
    pub mail: MailConfig,
    /// Base of the links mailed to users.
    pub public_url: String,
    pub minio_endpoint: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn parse_or(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: var_or("JWT_ISSUER", "memehub"),
            audience: var_or("JWT_AUDIENCE", "memehub-users"),
            expires_in_minutes: parse_or("JWT_EXPIRES_IN_MINUTES", 90 * 24 * 60),
            cookie_expires_in_days: parse_or("JWT_COOKIE_EXPIRES_IN_DAYS", 90),
        };
        let mail = MailConfig {
            from: var_or("EMAIL_FROM", "MemeHub <hello@memehub.local>"),
            api_url: std::env::var("MAIL_API_URL").ok().filter(|v| !v.is_empty()),
            api_key: var_or("MAIL_API_KEY", ""),
        };
        Ok(Self {
            env: Environment::parse(&var_or("APP_ENV", "production")),
            database_url,
            jwt,
            mail,
            public_url: var_or("APP_PUBLIC_URL", "http://localhost:8080")
                .trim_end_matches('/')
                .to_string(),
            minio_endpoint: var_or("MINIO_ENDPOINT", "http://localhost:9000"),
            minio_bucket: var_or("MINIO_BUCKET", "memehub"),
            minio_access_key: var_or("MINIO_ACCESS_KEY", "minioadmin"),
            minio_secret_key: var_or("MINIO_SECRET_KEY", "minioadmin"),
        })
    }

    pub fn is_production(&self) -> bool {
        self.env == Environment::Production
    }

    /// Settings for tests and the in-memory store.
    pub fn for_tests() -> Self {
        Self {
            env: Environment::Production,
            database_url: "memory://".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "memehub".into(),
                audience: "memehub-users".into(),
                expires_in_minutes: 60,
                cookie_expires_in_days: 1,
            },
            mail: MailConfig {
                from: "MemeHub <test@memehub.local>".into(),
                api_url: None,
                api_key: String::new(),
            },
            public_url: "http://localhost:8080".into(),
            minio_endpoint: "fake".into(),
            minio_bucket: "fake".into(),
            minio_access_key: "fake".into(),
            minio_secret_key: "fake".into(),
        }
    }
}
