use clap::{Parser, Subcommand};

/// notify-hub: persisted, pushed and preference-gated notifications
#[derive(Parser)]
#[command(name = "notify-hub", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Where and as whom client-side commands talk to the hub.
#[derive(clap::Args, Clone)]
pub struct ClientArgs {
    /// Hub base URL
    #[arg(long, env = "NOTIFY_HUB_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,
    /// User token (see `token issue`)
    #[arg(long, env = "NOTIFY_HUB_TOKEN", default_value = "")]
    pub token: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the hub server
    Serve {
        /// Port to bind (defaults to NOTIFY_HUB_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage user tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Create and deliver a notification (producer side)
    Send {
        #[command(flatten)]
        client: ClientArgs,
        /// Recipient user id
        #[arg(long)]
        user: String,
        /// Event type, e.g. deadline_approaching
        #[arg(long = "type")]
        kind: String,
        /// info, important or critical
        #[arg(long, default_value = "info")]
        priority: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        link: Option<String>,
        /// Admin key the hub expects in X-Admin-Key
        #[arg(long, env = "NOTIFY_HUB_ADMIN_KEY")]
        admin_key: Option<String>,
    },

    /// Follow a user's notification feed live
    Watch {
        #[command(flatten)]
        client: ClientArgs,
        /// Notifications to load initially
        #[arg(long, default_value = "50")]
        limit: i64,
        /// Log alerts through tracing instead of printing them
        #[arg(long)]
        quiet: bool,
    },

    /// Inspect or change notification preferences
    Prefs {
        #[command(subcommand)]
        command: PrefsCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a signed user token
    Issue {
        /// User id (UUID)
        #[arg(long)]
        user: String,
        /// Lifetime in hours
        #[arg(long, default_value = "24")]
        ttl_hours: i64,
    },
}

#[derive(Subcommand)]
pub enum PrefsCommands {
    /// Show the caller's preferences
    Show {
        #[command(flatten)]
        client: ClientArgs,
    },
    /// Set one flag
    Set {
        #[command(flatten)]
        client: ClientArgs,
        /// email or in_app
        channel: String,
        /// Event type key, e.g. chat_message
        key: String,
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Flip one flag
    Toggle {
        #[command(flatten)]
        client: ClientArgs,
        channel: String,
        key: String,
    },
}
