/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Redis connection string (queue broker transport)
    pub redis_url: String,

    /// Port the HTTP ingress listens on (default: 8080)
    pub http_port: u16,

    /// Delivery attempts per job before dead-lettering (default: 3)
    pub worker_max_retries: u32,

    /// Fixed delay between delivery attempts in seconds (default: 25)
    pub worker_retry_delay_secs: u64,

    /// Grace period for the in-flight job during shutdown (default: 30)
    pub shutdown_grace_secs: u64,

    /// HTTP email provider endpoint (Resend-style)
    pub email_api_url: String,

    /// Provider API key; when unset, sends are simulated
    pub email_api_key: Option<String>,

    /// Sender address for outgoing email
    pub email_from: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            http_port: std::env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HTTP_PORT must be a valid u16"))?,
            worker_max_retries: std::env::var("WORKER_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WORKER_MAX_RETRIES must be a valid u32"))?,
            worker_retry_delay_secs: std::env::var("WORKER_RETRY_DELAY_SECS")
                .unwrap_or_else(|_| "25".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WORKER_RETRY_DELAY_SECS must be a valid u64"))?,
            shutdown_grace_secs: std::env::var("SHUTDOWN_GRACE_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SHUTDOWN_GRACE_SECS must be a valid u64"))?,
            email_api_url: std::env::var("EMAIL_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com/emails".to_string()),
            email_api_key: std::env::var("EMAIL_API_KEY").ok(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "no-reply@courier.dev".to_string()),
        })
    }
}
