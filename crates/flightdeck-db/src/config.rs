use flightdeck_core::AppError;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connection settings for the PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Read `DATABASE_URL` (required) and `DATABASE_MAX_CONNECTIONS`
    /// (optional, default 5).
    pub fn from_env() -> Result<Self, AppError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| {
            AppError::ConfigError("DATABASE_URL not set. Required for database operations.".into())
        })?;
        let max_connections =
            parse_max_connections(std::env::var("DATABASE_MAX_CONNECTIONS").ok().as_deref())?;

        Ok(Self {
            url,
            max_connections,
        })
    }
}

fn parse_max_connections(raw: Option<&str>) -> Result<u32, AppError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_MAX_CONNECTIONS);
    };
    let parsed: u32 = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!(
            "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
        ))
    })?;
    if parsed == 0 {
        return Err(AppError::ConfigError(
            "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
        ));
    }
    Ok(parsed)
}
