use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Murmur binary.
#[derive(Debug, Parser)]
#[command(name = "murmur", version, about = "Murmur timeline engine")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MURMUR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Apply pending database migrations.
    Migrate(MigrateArgs),
    /// Create a post and fan it out to the author's followers.
    Post(PostArgs),
    /// Print a user's timeline as JSON, most recent first.
    Timeline(TimelineArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub logging: LoggingOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RuntimeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the social graph API base URL.
    #[arg(long = "social-graph-url", value_name = "URL")]
    pub social_graph_url: Option<String>,

    /// Publish post-created events to this webhook instead of the in-process channel.
    #[arg(long = "events-webhook-url", value_name = "URL")]
    pub events_webhook_url: Option<String>,

    /// Override the number of fan-out workers.
    #[arg(long = "fanout-workers", value_name = "COUNT")]
    pub fanout_workers: Option<u64>,

    /// Override the number of posts read per timeline.
    #[arg(long = "timeline-query-limit", value_name = "COUNT")]
    pub timeline_query_limit: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct PostArgs {
    /// Id of the posting user.
    #[arg(long, value_name = "USER_ID")]
    pub author: String,

    /// Post body, at most 280 characters.
    #[arg(long, value_name = "TEXT")]
    pub content: String,

    #[command(flatten)]
    pub overrides: RuntimeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct TimelineArgs {
    /// Id of the user whose timeline is read.
    #[arg(long, value_name = "USER_ID")]
    pub user: String,

    #[command(flatten)]
    pub overrides: RuntimeOverrides,
}
