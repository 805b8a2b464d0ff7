use anyhow::Result;
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use local_notifier::config;
use local_notifier::db;
use local_notifier::delivery::{self, LogSink};
use local_notifier::domain::{
    NewReminder, NewScheduledText, ReminderService, Saved, ScheduledTextService,
};
use local_notifier::intent::{self, IntentAction};
use local_notifier::platform::SqlitePlatform;
use local_notifier::store::SqliteKvStore;
use local_notifier::{
    HandleStore, NotificationHandle, NotificationOrchestrator, NudgeStatus, Scheduler,
    SystemClock,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Keep today's nudges scheduled and fire due notifications until Ctrl-C
    Run,
    /// Schedule today's nudge batch unless it is already pending
    StartNudges,
    /// Cancel the nudge batch
    StopNudges,
    /// Create a reminder
    Remind {
        /// ISO-8601 time; without an offset it is local time
        #[arg(long)]
        when: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        profile: Option<String>,
        #[arg(long)]
        profile_id: Option<i64>,
    },
    /// Create a scheduled text
    Text {
        #[arg(long)]
        when: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        profile: Option<String>,
        #[arg(long)]
        profile_id: Option<i64>,
    },
    /// Move a reminder to a new time
    RescheduleReminder {
        id: i64,
        #[arg(long)]
        when: String,
    },
    /// Move a scheduled text to a new time
    RescheduleText {
        id: i64,
        #[arg(long)]
        when: String,
    },
    DeleteReminder { id: i64 },
    DeleteText { id: i64 },
    /// Cancel one notification by handle
    Cancel { handle: String },
    /// Cancel every pending notification
    CancelAll,
    /// List pending notifications
    Pending,
    /// Apply an intent JSON document from the intent endpoint
    Intent { json: String },
    /// Print a sample config file
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let platform = Arc::new(SqlitePlatform::new(
        pool.clone(),
        cfg.notifications.permission_granted,
        cfg.notifications.grant_on_request,
    ));
    let store = HandleStore::new(Arc::new(SqliteKvStore::new(pool.clone())));
    let notifier = Arc::new(
        NotificationOrchestrator::new(
            Scheduler::new(platform),
            store,
            Arc::new(SystemClock),
            Local,
            StdRng::from_entropy(),
        )
        .with_nudges_enabled(cfg.notifications.nudges_enabled),
    );
    let reminders = ReminderService::new(pool.clone(), notifier.clone());
    let texts = ScheduledTextService::new(pool.clone(), notifier.clone());

    match args.command {
        Command::Run => {
            let worker_pool = pool.clone();
            let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
            let max_backoff = cfg.app.max_backoff_seconds as i64;
            tokio::spawn(async move {
                loop {
                    match delivery::deliver_next_due(&worker_pool, &LogSink, Utc::now(), max_backoff)
                        .await
                    {
                        Ok(processed) => {
                            if !processed {
                                tokio::time::sleep(poll_sleep).await;
                            }
                        }
                        Err(err) => {
                            error!(?err, "delivery worker error");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            });

            info!("starting notifier");
            let mut ticker =
                tokio::time::interval(Duration::from_secs(cfg.app.nudge_check_interval_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => report_nudges(notifier.start().await),
                    _ = tokio::signal::ctrl_c() => {
                        info!("shutting down");
                        break;
                    }
                }
            }
        }
        Command::StartNudges => report_nudges(notifier.start().await),
        Command::StopNudges => notifier.stop().await,
        Command::Remind {
            when,
            title,
            description,
            profile,
            profile_id,
        } => {
            let saved = reminders
                .create(NewReminder {
                    title,
                    description,
                    profile_name: profile,
                    profile_id,
                    scheduled_for: intent::parse_when(&when, &Local)?,
                })
                .await?;
            report_saved(&saved);
        }
        Command::Text {
            when,
            phone,
            message,
            profile,
            profile_id,
        } => {
            let saved = texts
                .create(NewScheduledText {
                    phone_number: phone,
                    message,
                    profile_name: profile,
                    profile_id,
                    scheduled_for: intent::parse_when(&when, &Local)?,
                })
                .await?;
            report_saved(&saved);
        }
        Command::RescheduleReminder { id, when } => {
            let saved = reminders
                .reschedule(id, intent::parse_when(&when, &Local)?)
                .await?;
            report_saved(&saved);
        }
        Command::RescheduleText { id, when } => {
            let saved = texts
                .reschedule(id, intent::parse_when(&when, &Local)?)
                .await?;
            report_saved(&saved);
        }
        Command::DeleteReminder { id } => reminders.delete(id).await?,
        Command::DeleteText { id } => texts.delete(id).await?,
        Command::Cancel { handle } => notifier.cancel(&NotificationHandle::new(handle)).await?,
        Command::CancelAll => notifier.cancel_all().await?,
        Command::Pending => {
            for item in notifier.pending().await? {
                println!(
                    "{}\t{}\t{:?}\t{}",
                    item.handle,
                    item.fire_at.with_timezone(&Local).to_rfc3339(),
                    item.payload.kind(),
                    item.payload.title()
                );
            }
        }
        Command::Intent { json } => match intent::decode(&json, &Local)? {
            IntentAction::Reminder(new) => report_saved(&reminders.create(new).await?),
            IntentAction::ScheduledText(new) => report_saved(&texts.create(new).await?),
            IntentAction::NoAction(explanation) => println!("no action: {}", explanation),
            IntentAction::NotSchedulable(name) => println!("intent {} schedules nothing", name),
        },
        Command::ExampleConfig => {}
    }

    Ok(())
}

fn report_nudges(status: NudgeStatus) {
    match status {
        NudgeStatus::Disabled => info!("nudges disabled"),
        NudgeStatus::AlreadyScheduled(batch) => info!(date = %batch.date, "nudges already pending"),
        NudgeStatus::Scheduled(batch) => {
            info!(date = %batch.date, handles = ?batch.handles, "nudges scheduled")
        }
        NudgeStatus::Failed(err) => warn!(%err, "nudges not scheduled"),
    }
}

fn report_saved<T: Debug>(saved: &Saved<T>) {
    println!("{:?}", saved.record);
    match &saved.notification {
        Ok(handle) => println!("notification: {}", handle),
        Err(err) => println!("notification not scheduled: {}", err),
    }
}
