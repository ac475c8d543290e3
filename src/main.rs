use std::{process, sync::Arc};

use murmur::{
    application::{
        error::AppError,
        repos::{EventPublisher, PostStore, SocialGraph, TimelineCache},
        timeline::TimelineService,
    },
    cache::{CacheConfig, TimelineStore},
    config::{self, Command, PostArgs, TimelineArgs},
    domain::types::UserId,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        events::{BroadcastPublisher, WebhookPublisher},
        graph::HttpSocialGraph,
        telemetry,
    },
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        Command::Migrate(_) => run_migrate(&settings).await,
        Command::Post(args) => run_post(&settings, args).await,
        Command::Timeline(args) => run_timeline(&settings, args).await,
    }
}

async fn run_migrate(settings: &config::Settings) -> Result<(), AppError> {
    let repositories = connect_repositories(settings).await?;
    PostgresRepositories::run_migrations(repositories.pool())
        .await
        .map_err(InfraError::from)?;
    info!("migrations applied");
    Ok(())
}

async fn run_post(settings: &config::Settings, args: PostArgs) -> Result<(), AppError> {
    let author = UserId::parse(args.author)?;
    let service = build_service(settings).await?;
    let cancel = cancel_on_interrupt();

    let post_id = service.create_post(&author, &args.content, &cancel).await?;

    println!("{}", serde_json::json!({ "id": post_id }));
    Ok(())
}

async fn run_timeline(settings: &config::Settings, args: TimelineArgs) -> Result<(), AppError> {
    let user = UserId::parse(args.user)?;
    let service = build_service(settings).await?;
    let cancel = cancel_on_interrupt();

    let posts = service.get_timeline(&user, &cancel).await?;

    let rendered = serde_json::to_string_pretty(&posts)
        .map_err(|err| AppError::unexpected(format!("failed to encode timeline: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn connect_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool =
        PostgresRepositories::connect(database_url, settings.database.max_connections.get())
            .await
            .map_err(InfraError::from)?;

    let repositories = PostgresRepositories::new(pool);
    repositories
        .health_check()
        .await
        .map_err(InfraError::from)?;
    Ok(Arc::new(repositories))
}

async fn build_service(settings: &config::Settings) -> Result<TimelineService, AppError> {
    let store: Arc<dyn PostStore> = connect_repositories(settings).await?;
    let cache: Arc<dyn TimelineCache> =
        Arc::new(TimelineStore::new(CacheConfig::from(&settings.cache)));
    let graph: Arc<dyn SocialGraph> = Arc::new(HttpSocialGraph::new(
        settings.social_graph.base_url.clone(),
        settings.social_graph.timeout,
    )?);
    let publisher = build_publisher(&settings.events)?;

    Ok(TimelineService::new(
        store,
        cache,
        publisher,
        graph,
        settings.timeline_config(),
    ))
}

fn build_publisher(events: &config::EventsSettings) -> Result<Arc<dyn EventPublisher>, AppError> {
    if let Some(url) = events.webhook_url.clone() {
        return Ok(Arc::new(WebhookPublisher::new(url, events.timeout)?));
    }

    let publisher = BroadcastPublisher::new(events.broadcast_capacity);
    let mut receiver = publisher.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => info!(
                    kind = %event.kind,
                    post_id = %event.post.id,
                    author_id = %event.post.author_id,
                    correlation_id = %event.correlation_id,
                    "post created event"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log subscriber lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
    Ok(Arc::new(publisher))
}

fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling in-flight operation");
            trigger.cancel();
        }
    });
    token
}
