//! 已用题目记录
//!
//! 记录已经在完成的测验中出现过的题目 ID。集合受版本号约束：
//! 请求的版本与已保存的版本不一致时（例如题库结构变更），集合被清空并采用新版本。

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};

use crate::questions::UsedQuestionTracker;
use crate::storage::{DatabaseManager, StorageResult};

/// 基于 SQLite 的已用题目记录器
#[derive(Clone)]
pub struct SqliteUsedQuestionTracker {
    db: DatabaseManager,
}

impl SqliteUsedQuestionTracker {
    /// 创建新的记录器实例
    pub fn new(db: DatabaseManager) -> Self {
        Self { db }
    }

    /// 切换复习模式（允许重复出题）
    pub fn set_review_mode(&self, version: i64, enabled: bool) -> StorageResult<()> {
        self.db.transaction(|conn| {
            Self::ensure_version(conn, version)?;
            conn.execute(
                "UPDATE used_question_state SET review_mode = ?1 WHERE id = 1",
                params![enabled as i32],
            )?;
            Ok(())
        })
    }

    /// 版本不一致时清空集合并记录新版本
    fn ensure_version(conn: &Connection, version: i64) -> StorageResult<()> {
        let stored: Option<i64> = conn
            .query_row(
                "SELECT version FROM used_question_state WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(v) if v == version => {}
            Some(v) => {
                tracing::info!(from = v, to = version, "题库版本变更，清空已用题目");
                conn.execute("DELETE FROM used_question", [])?;
                conn.execute(
                    "UPDATE used_question_state SET version = ?1, review_mode = 0 WHERE id = 1",
                    params![version],
                )?;
            }
            None => {
                conn.execute("DELETE FROM used_question", [])?;
                conn.execute(
                    "INSERT INTO used_question_state (id, version, review_mode) VALUES (1, ?1, 0)",
                    params![version],
                )?;
            }
        }
        Ok(())
    }
}

impl UsedQuestionTracker for SqliteUsedQuestionTracker {
    fn get_used_ids(&self, version: i64) -> StorageResult<HashSet<String>> {
        self.db.transaction(|conn| {
            Self::ensure_version(conn, version)?;
            let mut stmt = conn.prepare("SELECT question_id FROM used_question")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<HashSet<_>, _>>()?;
            Ok(ids)
        })
    }

    fn mark_used(&self, ids: &[String], version: i64) -> StorageResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.db.transaction(|conn| {
            Self::ensure_version(conn, version)?;
            let mut stmt = conn.prepare(
                "INSERT OR REPLACE INTO used_question (question_id, version, used_at)
                 VALUES (?1, ?2, datetime('now'))",
            )?;
            for id in ids {
                stmt.execute(params![id, version])?;
            }
            Ok(())
        })?;
        tracing::debug!(count = ids.len(), version, "已标记题目为已用");
        Ok(())
    }

    fn is_review_mode(&self, version: i64) -> StorageResult<bool> {
        self.db.transaction(|conn| {
            Self::ensure_version(conn, version)?;
            let enabled: i32 = conn.query_row(
                "SELECT review_mode FROM used_question_state WHERE id = 1",
                [],
                |row| row.get(0),
            )?;
            Ok(enabled != 0)
        })
    }

    fn reset(&self, version: i64) -> StorageResult<()> {
        self.db.transaction(|conn| {
            Self::ensure_version(conn, version)?;
            conn.execute("DELETE FROM used_question", [])?;
            conn.execute(
                "UPDATE used_question_state SET review_mode = 0 WHERE id = 1",
                [],
            )?;
            Ok(())
        })
    }
}
