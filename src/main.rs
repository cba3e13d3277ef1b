use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use reqwest::Method;
use std::path::PathBuf;

use kyc_lite_offline::app::App;
use kyc_lite_offline::config::Config;
use kyc_lite_offline::gateway::UPLOAD_QUEUE_TAG;
use kyc_lite_offline::logging;
use kyc_lite_offline::sync::{ReviewAction, ReviewDecision, SessionStatus, SyncPayload};

#[derive(Parser, Debug)]
#[command(name = "kyc-lite")]
#[command(about = "Offline cache gateway and sync queue for KYC Lite")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kyc-lite/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Origin of the KYC Lite deployment
  #[arg(long, global = true)]
  origin: Option<String>,

  /// Act as if the network were down
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the app shell and activate the gateway
  Install,
  /// Route one request through the gateway
  Fetch {
    path: String,
    #[arg(long)]
    accept: Option<String>,
    #[arg(long, default_value = "GET", value_parser = parse_method)]
    method: Method,
  },
  /// List cache partitions
  Caches,
  /// Inspect or modify the sync queue
  #[command(subcommand)]
  Queue(QueueCommand),
  /// Fire a background sync event
  Sync {
    #[arg(long, default_value = UPLOAD_QUEUE_TAG)]
    tag: String,
  },
  /// Deliver a push message
  Push { message: Option<String> },
  /// Watch connectivity and sync on reconnect until Ctrl-C
  Run,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// Queue a review decision
  Review {
    session_id: String,
    /// approve, reject or request-documents
    decision: ReviewDecision,
    #[arg(long, default_value = "")]
    comments: String,
    #[arg(long, default_value = "admin")]
    reviewer: String,
  },
  /// Queue a session status change
  Status {
    session_id: String,
    /// active, completed or expired
    status: SessionStatus,
  },
  /// Queue a bulk action over several sessions
  Bulk {
    action: String,
    #[arg(required = true)]
    session_ids: Vec<String>,
  },
  /// Show queued operations
  Pending,
  /// Replay the queue now
  Drain,
  /// Drop every queued operation
  Reset,
}

fn parse_method(s: &str) -> Result<Method, String> {
  Method::from_bytes(s.to_ascii_uppercase().as_bytes()).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    Config { origin, ..config }
  } else {
    config
  };
  config.validate()?;

  let _log_guard = logging::init(&config.log)?;

  let app = App::new(config)?;
  app.connect(args.offline).await?;

  match args.command {
    Command::Install => {
      app.gateway().install().await?;
      println!("Gateway installed and active");
    }
    Command::Fetch {
      path,
      accept,
      method,
    } => {
      let response = app.fetch(&path, method, accept.as_deref()).await?;
      let snapshot = &response.data;
      match response.cached_at {
        Some(at) => println!("{} ({}, cached {})", snapshot.status, response.source, at),
        None => println!("{} ({})", snapshot.status, response.source),
      }
      for (name, value) in &snapshot.headers {
        println!("{}: {}", name, value);
      }
      println!();
      println!("{}", snapshot.text());
    }
    Command::Caches => {
      let caches = app.caches()?;
      if caches.is_empty() {
        println!("No caches");
      }
      for (name, count) in caches {
        println!("{:<32} {:>6} entries", name, count);
      }
    }
    Command::Queue(command) => run_queue_command(&app, command).await,
    Command::Sync { tag } => {
      if app.gateway().handle_sync(&tag).await {
        println!("Sync '{}' done, {} pending", tag, app.manager().pending_count());
      } else {
        println!("Unknown sync tag '{}'", tag);
      }
    }
    Command::Push { message } => {
      let notification = app.gateway().handle_push(message.as_deref());
      println!("{}: {}", notification.title, notification.body);
    }
    Command::Run => app.run(args.offline).await?,
  }

  Ok(())
}

async fn run_queue_command(app: &App, command: QueueCommand) {
  let manager = app.manager();

  let payload = match command {
    QueueCommand::Review {
      session_id,
      decision,
      comments,
      reviewer,
    } => SyncPayload::ReviewSubmission {
      session_id: session_id.clone(),
      review_action: ReviewAction {
        id: None,
        session_id,
        reviewer_id: reviewer,
        action: decision,
        comments,
        timestamp: Utc::now(),
        documents_reviewed: Vec::new(),
        risk_assessment: None,
      },
    },
    QueueCommand::Status { session_id, status } => {
      SyncPayload::StatusUpdate { session_id, status }
    }
    QueueCommand::Bulk {
      action,
      session_ids,
    } => SyncPayload::BulkAction {
      action,
      session_ids,
    },
    QueueCommand::Pending => {
      let items = manager.pending_items();
      println!("{} pending", items.len());
      for item in items {
        println!(
          "{}  {:<18} retries={}  {}",
          item.id,
          item.kind().to_string(),
          item.retry_count,
          item.enqueued_at
        );
      }
      return;
    }
    QueueCommand::Drain => {
      match manager.drain().await {
        Some(report) => println!(
          "{} synced, {} dropped, {} pending",
          report.synced, report.dropped, report.retained
        ),
        None => println!("A sync is already running"),
      }
      return;
    }
    QueueCommand::Reset => {
      manager.reset().await;
      println!("Queue cleared");
      return;
    }
  };

  let id = manager.enqueue(payload).await;
  println!("Queued {} ({} pending)", id, manager.pending_count());
}
