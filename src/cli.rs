use clap::{Parser, Subcommand};

/// RankPilot — SEO toolkit backend
#[derive(Parser)]
#[command(name = "rankpilot", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Port to bind
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage API keys
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Inspect and maintain bookmarklet tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Provision a new user
    Create {
        #[arg(long)]
        email: String,
        /// Plan: free, starter, pro
        #[arg(long, default_value = "free")]
        plan: String,
    },
    /// List users
    List,
    /// Change a user's plan
    SetPlan {
        #[arg(long)]
        user_id: String,
        /// Plan: free, starter, pro
        #[arg(long)]
        plan: String,
    },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Mint a new API key for a user (prints the plaintext key once)
    Create {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        name: String,
    },
    /// List a user's API keys (metadata only)
    List {
        #[arg(long)]
        user_id: String,
    },
    /// Revoke an API key
    Revoke {
        #[arg(long)]
        id: String,
        #[arg(long)]
        user_id: String,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// List bookmarklet tokens for a project
    List {
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        user_id: String,
    },
    /// Delete token rows expired more than N days ago
    Purge {
        #[arg(long, default_value = "30")]
        days: i64,
    },
}
