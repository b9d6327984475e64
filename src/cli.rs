use clap::{Parser, Subcommand};

/// VPDB - Visual Pinball Database API
#[derive(Parser)]
#[command(name = "vpdb", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Port to bind, overrides VPDB_PORT
        #[arg(short, long)]
        port: Option<u16>,
        /// Run on in-memory storage instead of Postgres and Redis
        #[arg(long)]
        in_memory: bool,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage app tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a local user
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        plan: Option<String>,
        #[arg(long, value_delimiter = ',')]
        roles: Option<Vec<String>>,
    },
    /// Replace a user's roles
    Roles {
        #[arg(long)]
        id: String,
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
    },
    /// Move a user to another plan
    Plan {
        #[arg(long)]
        id: String,
        #[arg(long)]
        plan: String,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// List a user's tokens
    List {
        #[arg(long)]
        user: String,
    },
    /// Deactivate a token
    Revoke {
        #[arg(long)]
        id: String,
    },
}
