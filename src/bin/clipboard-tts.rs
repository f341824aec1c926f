//! clipboard-tts CLI: stage workers plus the producer and management surface.

use anyhow::Context;
use clap::{Parser, Subcommand};
use clipboard_tts::artifact::FsArtifacts;
use clipboard_tts::capability::anthropic::{AnthropicGenerator, anthropic_client};
use clipboard_tts::capability::speech::HttpSpeechClient;
use clipboard_tts::config::Config;
use clipboard_tts::config::secrets::{ExposeSecret, redact_url};
use clipboard_tts::db::listener::PgConnector;
use clipboard_tts::db::{Db, FailoverDb};
use clipboard_tts::error;
use clipboard_tts::listener::{ChangeListener, EventHandler};
use clipboard_tts::model::work::{Stage, WorkId, WorkItem};
use clipboard_tts::pipeline::{AnswerStage, SpeechStage, StageProcessor, is_error_marker};
use clipboard_tts::retry::Backoff;
use clipboard_tts::store::{self, WorkStore};
use clipboard_tts::supervisor::Supervisor;
use clipboard_tts::telemetry::{TelemetryConfig, init_telemetry};
use clipboard_tts::worker;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::warn;

#[derive(Parser)]
#[command(name = "clipboard-tts", about = "Question -> answer -> speech pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one pipeline stage until interrupted
    Worker {
        /// Stage to run: "answer" or "speech"
        stage: Stage,
    },
    /// Insert a question; the answer worker picks it up
    Submit {
        /// Question text
        text: String,
    },
    /// List work items, newest first
    List {
        /// Maximum items to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show a work item
    Show {
        /// Work item ID
        id: i64,
    },
    /// Delete a work item and its audio
    Delete {
        /// Work item ID
        id: i64,
    },
    /// Test every configured database URL and the schema
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Worker { stage } => cmd_worker(config, stage).await,
        Command::Check => cmd_check(&config).await,
        Command::Submit { text } => cmd_submit(&open(&config).await?, &text).await,
        Command::List { limit } => cmd_list(&open(&config).await?, limit).await,
        Command::Show { id } => cmd_show(&open(&config).await?, WorkId(id)).await,
        Command::Delete { id } => {
            cmd_delete(&open(&config).await?, &config, WorkId(id)).await
        }
    }
}

/// Connect and migrate, for the one-shot commands.
async fn open(config: &Config) -> anyhow::Result<Db> {
    let db = FailoverDb::new(config.database_urls.clone()).connect().await?;
    db.migrate().await?;
    Ok(db)
}

/// Connect and migrate, retrying with the reconnect backoff.
async fn connect_with_backoff(dbs: &FailoverDb, mut backoff: Backoff) -> error::Result<()> {
    loop {
        match dbs.connect().await {
            Ok(db) => return db.migrate().await,
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    attempt = backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "database unavailable: {e}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn cmd_worker(config: Config, stage: Stage) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: format!("clipboard-tts-{stage}"),
        log_level: config.log_level.clone(),
    })?;

    let dbs = Arc::new(FailoverDb::new(config.database_urls.clone()));
    let store: Arc<dyn WorkStore> = dbs.clone();

    let handler: Arc<dyn EventHandler> = match stage {
        Stage::Answer => {
            let client = anthropic_client(config.require_anthropic_key()?)
                .map_err(|e| anyhow::anyhow!("cannot build Anthropic client: {e}"))?;
            let generator = AnthropicGenerator::new(client, &config.answer_model)
                .preamble(&config.answer_preamble);
            Arc::new(
                StageProcessor::new(store, AnswerStage::new(Arc::new(generator)))
                    .policy(config.retry)
                    .timeout(config.capability_timeout),
            )
        }
        Stage::Speech => {
            let synthesizer = HttpSpeechClient::new(
                &config.speech.url,
                config.require_speech_key()?,
                &config.speech.model,
                &config.speech.voice,
                config.capability_timeout,
            )?;
            let artifacts = FsArtifacts::new(&config.artifact_dir, &config.artifact_url_prefix);
            Arc::new(
                StageProcessor::new(
                    store,
                    SpeechStage::new(Arc::new(synthesizer), Arc::new(artifacts)),
                )
                .policy(config.retry)
                .timeout(config.capability_timeout),
            )
        }
    };

    let mut listener = ChangeListener::new();
    listener.subscribe(stage.channel(), handler);

    let supervisor = Supervisor::new(
        PgConnector::new(dbs.clone()),
        listener,
        config.reconnect_backoff(),
    )
    .grace(config.shutdown_grace);

    let health_listener = match &config.health_addr {
        Some(addr) => Some(
            TcpListener::bind(addr)
                .await
                .with_context(|| format!("cannot bind health endpoint on {addr}"))?,
        ),
        None => None,
    };

    let ready = connect_with_backoff(&dbs, config.reconnect_backoff());
    worker::run(
        supervisor,
        &stage.to_string(),
        health_listener,
        ready,
        worker::shutdown_signal(),
    )
    .await?;
    dbs.close().await;
    Ok(())
}

async fn cmd_submit(db: &Db, text: &str) -> anyhow::Result<()> {
    let text = text.trim();
    if text.is_empty() {
        anyhow::bail!("question is empty");
    }
    let id = db.insert(text).await?;
    println!("Submitted: {id}");
    Ok(())
}

fn status(item: &WorkItem) -> &'static str {
    match (&item.answer, &item.audio) {
        (None, _) => "answering",
        (Some(a), _) if is_error_marker(a) => "failed",
        (Some(_), None) => "speaking",
        (Some(_), Some(audio)) if is_error_marker(audio) => "no-audio",
        (Some(_), Some(_)) => "done",
    }
}

fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > max {
        let cut: String = line.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

async fn cmd_list(db: &Db, limit: usize) -> anyhow::Result<()> {
    let ids = db.list_ids().await?;
    if ids.is_empty() {
        println!("No work items found.");
        return Ok(());
    }

    println!("{:<8}  {:<10}  {:<16}  QUESTION", "ID", "STATUS", "CREATED");
    println!("{}", "-".repeat(90));

    let mut shown = 0;
    for id in ids.into_iter().take(limit) {
        // deleted between list and fetch
        let Some(item) = db.fetch(id).await? else {
            continue;
        };
        println!(
            "{:<8}  {:<10}  {:<16}  {}",
            item.id,
            status(&item),
            item.created_at.format("%Y-%m-%d %H:%M"),
            preview(&item.question, 50)
        );
        shown += 1;
    }

    println!("\n{shown} item(s)");
    Ok(())
}

async fn cmd_show(db: &Db, id: WorkId) -> anyhow::Result<()> {
    let item = db
        .fetch(id)
        .await?
        .with_context(|| format!("no work item with id {id}"))?;

    println!("ID:         {}", item.id);
    println!("Status:     {}", status(&item));
    println!("Created:    {}", item.created_at);
    println!("Updated:    {}", item.updated_at);
    println!("Question:   {}", item.question);
    println!("Answer:     {}", item.answer.as_deref().unwrap_or("-"));
    println!("Audio:      {}", item.audio.as_deref().unwrap_or("-"));
    Ok(())
}

async fn cmd_delete(db: &Db, config: &Config, id: WorkId) -> anyhow::Result<()> {
    let artifacts = FsArtifacts::new(&config.artifact_dir, &config.artifact_url_prefix);
    if store::delete_item(db, &artifacts, id).await? {
        println!("Deleted: {id}");
        Ok(())
    } else {
        anyhow::bail!("no work item with id {id}")
    }
}

async fn cmd_check(config: &Config) -> anyhow::Result<()> {
    let mut reachable = 0;
    for (i, url) in config.database_urls.iter().enumerate() {
        let label = redact_url(url);
        println!("[{}/{}] {label}", i + 1, config.database_urls.len());

        let db = match Db::connect(url.expose_secret()).await {
            Ok(db) => db,
            Err(e) => {
                println!("  connect:  FAILED ({e})");
                continue;
            }
        };
        reachable += 1;
        println!("  connect:  ok");

        match db.health_check().await {
            Ok(()) => println!("  query:    ok"),
            Err(e) => println!("  query:    FAILED ({e})"),
        }
        match db.has_schema().await {
            Ok(true) => println!("  schema:   questions_answers present"),
            Ok(false) => println!("  schema:   missing (run any command except check to migrate)"),
            Err(e) => println!("  schema:   FAILED ({e})"),
        }
        db.close().await;
    }

    if reachable == 0 {
        anyhow::bail!("no database reachable");
    }
    Ok(())
}
