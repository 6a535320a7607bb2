use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "chatgate", about = "streaming chat gateway")]
pub struct Cli {
    #[arg(long, default_value = "127.0.0.1", env = "CHATGATE_HOST")]
    pub host: String,

    #[arg(long, default_value_t = 8080, env = "CHATGATE_PORT")]
    pub port: u16,

    /// Database DSN; defaults to a sqlite file beside the executable.
    #[arg(long, default_value = "", env = "CHATGATE_DSN")]
    pub dsn: String,

    /// Public API key sent upstream when no user credential is available.
    #[arg(long, default_value = "", env = "CHATGATE_PUBLIC_KEY")]
    pub public_key: String,

    /// Session provider endpoint for credential refresh; anonymous-only
    /// when unset.
    #[arg(long, env = "CHATGATE_AUTH_URL")]
    pub auth_url: Option<String>,

    /// Optional JSON file mapping model ids to provider routes.
    #[arg(long, env = "CHATGATE_ROUTES")]
    pub routes: Option<String>,

    #[arg(long, default_value_t = 10, env = "CHATGATE_DAILY_LIMIT")]
    pub daily_limit: u32,

    #[arg(long, default_value_t = 2)]
    pub burst_threshold: u32,

    #[arg(long, default_value_t = 2)]
    pub burst_window_secs: i64,
}
