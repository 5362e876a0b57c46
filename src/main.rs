use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use progress_sync::config::Config;
use progress_sync::logging::init_tracing;
use progress_sync::questions::JsonQuestionPool;
use progress_sync::storage::{DatabaseManager, SqliteProfileStore, SqliteUsedQuestionTracker};
use progress_sync::sync::{HttpRemoteStore, SyncOrchestrator};
use progress_sync::{ProgressService, SessionSettings};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config);

    if let Err(err) = run(config).await {
        tracing::error!(error = %err, "progress-sync failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let db = DatabaseManager::new(&config.db_path)?;
    let store = SqliteProfileStore::new(db.clone());
    let tracker = Arc::new(SqliteUsedQuestionTracker::new(db));
    let pool = Arc::new(JsonQuestionPool::new(config.question_bank_dir.clone()));

    let sync = match config.remote_config() {
        Some(remote_config) => match HttpRemoteStore::new(remote_config) {
            Ok(remote) => Some(
                SyncOrchestrator::new(Arc::new(store.clone()), Arc::new(remote))
                    .with_last_sync_time(store.last_sync_time()?),
            ),
            Err(err) => {
                tracing::warn!(error = %err, "remote store not initialized, running offline");
                None
            }
        },
        None => {
            tracing::info!("no PROGRESS_API_BASE_URL configured, running offline");
            None
        }
    };

    let service = ProgressService::new(store, tracker, pool, sync, SessionSettings::from(&config));
    let mut profile = service.resume()?;
    tracing::info!(profile_id = %profile.id, auth = profile.auth_method.as_str(), "profile resumed");

    if let Some(sync) = service.sync() {
        match sync.perform_sync(&profile).await {
            Ok(report) => profile = report.profile,
            Err(err) => tracing::warn!(error = %err, "startup sync failed, using local profile"),
        }
    }

    let progress = &profile.progress;
    let report = json!({
        "profileId": profile.id,
        "authMethod": profile.auth_method.as_str(),
        "displayName": profile.display_name,
        "totalQuestionsAnswered": progress.total_questions_answered,
        "correctAnswers": progress.correct_answers,
        "averageQuizScore": progress.average_quiz_score,
        "currentStreak": progress.current_streak,
        "longestStreak": progress.longest_streak,
        "overallMasteryLevel": progress.overall_mastery_level,
        "recommendations": service.active_recommendations(&profile, Utc::now()),
        "sync": service.sync().map(|sync| sync.status()),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
