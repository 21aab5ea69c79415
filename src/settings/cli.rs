use super::Parser;
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServiceMode {
    /// Accounts and tokens; relays identity events.
    User,
    /// Roles and permissions; consumes identity events.
    Rbac,
    /// Both services in one process.
    Standalone,
}

#[derive(Parser, Debug)]
pub struct Cli {
    #[arg(long)]
    pub settings: Option<String>,

    #[arg(long, value_enum, default_value_t = ServiceMode::Standalone)]
    pub service: ServiceMode,
}
