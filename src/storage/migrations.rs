//! 本地数据库结构的版本迁移
//!
//! V1 建立档案表与同步元数据表，V2 加入已用题目集合。
//! 已记录在 schema_migrations 中的版本不会再次执行，每个版本在自己的事务里完成。

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::storage::{StorageError, StorageResult};

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// 迁移记录
#[derive(Debug, Clone)]
pub struct Migration {
    /// 迁移版本号
    pub version: i32,
    /// 迁移名称/描述
    pub name: &'static str,
    /// 迁移 SQL 语句
    pub sql: &'static str,
}

/// 按版本号升序排列的全部迁移
pub fn get_migrations() -> Vec<Migration> {
    vec![
        // V1: 档案与同步元数据
        Migration {
            version: 1,
            name: "档案与同步元数据",
            sql: r#"
            CREATE TABLE IF NOT EXISTS learner_profile (
                id TEXT PRIMARY KEY,
                auth_method TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_learner_profile_updated
                ON learner_profile(updated_at);
            "#,
        },
        // V2: 已用题目记录
        Migration {
            version: 2,
            name: "已用题目记录",
            sql: r#"
            CREATE TABLE IF NOT EXISTS used_question (
                question_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                used_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS used_question_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                review_mode INTEGER NOT NULL DEFAULT 0
            );
            "#,
        },
    ]
}

/// 确保迁移表存在
fn ensure_migrations_table(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );
        "#,
    )
    .map_err(|e| StorageError::Migration(format!("创建迁移表失败: {}", e)))?;

    Ok(())
}

/// 获取当前数据库版本（未执行任何迁移时为 0）
pub fn get_current_version(conn: &Connection) -> StorageResult<i32> {
    ensure_migrations_table(conn)?;

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// 运行所有待执行的迁移
pub fn run_migrations(conn: &Connection) -> StorageResult<()> {
    let current = get_current_version(conn)?;

    for migration in get_migrations()
        .into_iter()
        .filter(|m| m.version > current)
    {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "执行数据库迁移"
        );

        apply_migration(conn, &migration)?;
    }

    Ok(())
}

/// 单个迁移与其记录在同一事务中提交；失败时回滚并返回迁移错误
fn apply_migration(conn: &Connection, migration: &Migration) -> StorageResult<()> {
    conn.execute_batch("BEGIN")?;
    let applied = conn.execute_batch(migration.sql).and_then(|_| {
        conn.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, Utc::now().timestamp_millis()],
        )
    });

    match applied {
        Ok(_) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(
                    version = migration.version,
                    error = %rollback,
                    "迁移失败后回滚也失败"
                );
            }
            Err(StorageError::Migration(format!(
                "迁移 V{} ({}) 失败: {}",
                migration.version, migration.name, e
            )))
        }
    }
}
