use clap::Parser;

/// LLM API reverse-proxy and router.
#[derive(Debug, Parser)]
#[command(name = "maxx", version)]
pub struct Cli {
    /// Bind address.
    #[arg(long, env = "MAXX_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port.
    #[arg(long, env = "MAXX_PORT", default_value_t = 8788)]
    pub port: u16,

    /// Database DSN (sqlite file by default).
    #[arg(long, env = "MAXX_DSN", default_value = "sqlite://maxx.db?mode=rwc")]
    pub dsn: String,

    /// Admin password; empty disables JWT auth on /admin.
    #[arg(long, env = "MAXX_ADMIN_PASSWORD", default_value = "")]
    pub admin_password: String,

    /// Optional outbound proxy for upstream egress.
    #[arg(long, env = "MAXX_OUTBOUND_PROXY")]
    pub outbound_proxy: Option<String>,

    /// Port for the local Codex OAuth callback listener; 0 disables.
    #[arg(long, env = "MAXX_OAUTH_CALLBACK_PORT", default_value_t = 1455)]
    pub oauth_callback_port: u16,
}
