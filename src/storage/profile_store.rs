//! 学习者档案本地仓储
//!
//! 每个档案 ID 一条记录，整个档案以 JSON 形式保存在 `payload` 列中。
//! 写入在单个事务中完成，读取方不会看到部分写入的档案。

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::progress::model::LearnerProfile;
use crate::storage::{
    DatabaseManager, StorageError, StorageResult, META_ACTIVE_PROFILE_ID,
    META_ANONYMOUS_PROFILE_ID, META_LAST_SYNC_TIME,
};

// ============================================================
// LocalStore - 本地存储接口
// ============================================================

/// 本地档案存储接口
///
/// 所有写操作对调用方是同步的：返回时数据已经持久化。
pub trait LocalStore: Send + Sync {
    /// 读取档案；不存在或无法解析时返回 None
    fn load_profile(&self, id: &str) -> StorageResult<Option<LearnerProfile>>;

    /// 保存档案（插入或覆盖）
    fn save_profile(&self, profile: &LearnerProfile) -> StorageResult<()>;

    /// 删除档案；档案不存在时同样视为成功
    fn delete_profile(&self, id: &str) -> StorageResult<()>;

    /// 读取本机的匿名档案，首次调用时创建
    fn load_or_create_anonymous_profile(&self) -> StorageResult<LearnerProfile>;

    /// 记录最近一次成功同步的时间
    fn record_sync_time(&self, at: DateTime<Utc>) -> StorageResult<()>;
}

// ============================================================
// SqliteProfileStore - SQLite 实现
// ============================================================

/// 基于 SQLite 的档案仓储
#[derive(Clone)]
pub struct SqliteProfileStore {
    db: DatabaseManager,
}

impl SqliteProfileStore {
    /// 创建新的仓储实例
    pub fn new(db: DatabaseManager) -> Self {
        Self { db }
    }

    /// 获取数据库管理器引用
    pub fn db(&self) -> &DatabaseManager {
        &self.db
    }

    /// 获取当前活动档案 ID
    pub fn active_profile_id(&self) -> StorageResult<Option<String>> {
        self.db.get_sync_metadata(META_ACTIVE_PROFILE_ID)
    }

    /// 设置当前活动档案，下次启动时据此恢复
    pub fn set_active_profile(&self, id: &str) -> StorageResult<()> {
        self.db.set_sync_metadata(META_ACTIVE_PROFILE_ID, id)
    }

    /// 读取当前活动档案；没有活动档案时回退到匿名档案
    pub fn load_active_profile(&self) -> StorageResult<LearnerProfile> {
        if let Some(id) = self.active_profile_id()? {
            if let Some(profile) = self.load_profile(&id)? {
                return Ok(profile);
            }
            tracing::warn!(profile_id = %id, "活动档案缺失，回退到匿名档案");
        }
        self.load_or_create_anonymous_profile()
    }

    /// 获取上次成功同步时间
    pub fn last_sync_time(&self) -> StorageResult<Option<DateTime<Utc>>> {
        let value = self.db.get_sync_metadata(META_LAST_SYNC_TIME)?;
        Ok(value.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| tracing::warn!(error = %e, "解析同步时间失败"))
                .ok()
        }))
    }

    /// 列出本地保存的所有档案 ID
    pub fn profile_ids(&self) -> StorageResult<Vec<String>> {
        let conn = self.db.get_connection();
        let mut stmt = conn.prepare("SELECT id FROM learner_profile ORDER BY updated_at DESC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn write_profile(conn: &Connection, profile: &LearnerProfile) -> StorageResult<()> {
        let payload = serde_json::to_string(profile)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO learner_profile (id, auth_method, payload, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                auth_method = excluded.auth_method,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
            params![
                profile.id,
                profile.auth_method.as_str(),
                payload,
                profile.metadata.created_at.to_rfc3339(),
                profile.metadata.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

impl LocalStore for SqliteProfileStore {
    fn load_profile(&self, id: &str) -> StorageResult<Option<LearnerProfile>> {
        let payload: Option<String> = {
            let conn = self.db.get_connection();
            let payload = conn
                .query_row(
                    "SELECT payload FROM learner_profile WHERE id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .optional()?;
            payload
        };

        let Some(payload) = payload else {
            return Ok(None);
        };

        // 损坏的记录视为没有可用数据，而不是致命错误
        match serde_json::from_str::<LearnerProfile>(&payload) {
            Ok(profile) => Ok(Some(profile)),
            Err(e) => {
                tracing::warn!(profile_id = %id, error = %e, "本地档案无法解析，按不存在处理");
                Ok(None)
            }
        }
    }

    fn save_profile(&self, profile: &LearnerProfile) -> StorageResult<()> {
        self.db
            .transaction(|conn| Self::write_profile(conn, profile))?;
        tracing::debug!(profile_id = %profile.id, "档案已保存到本地");
        Ok(())
    }

    fn delete_profile(&self, id: &str) -> StorageResult<()> {
        self.db.transaction(|conn| {
            conn.execute("DELETE FROM learner_profile WHERE id = ?1", [id])?;
            Ok(())
        })?;

        if self.active_profile_id()?.as_deref() == Some(id) {
            self.db.delete_sync_metadata(META_ACTIVE_PROFILE_ID)?;
        }
        Ok(())
    }

    fn load_or_create_anonymous_profile(&self) -> StorageResult<LearnerProfile> {
        if let Some(id) = self.db.get_sync_metadata(META_ANONYMOUS_PROFILE_ID)? {
            if let Some(profile) = self.load_profile(&id)? {
                return Ok(profile);
            }
            tracing::warn!(profile_id = %id, "匿名档案不可用，重新创建");
        }

        let profile = LearnerProfile::anonymous(Utc::now());
        self.db.transaction(|conn| {
            Self::write_profile(conn, &profile)?;
            conn.execute(
                r#"
                INSERT INTO sync_metadata (key, value, updated_at)
                VALUES (?1, ?2, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
                params![META_ANONYMOUS_PROFILE_ID, profile.id],
            )?;
            Ok(())
        })?;

        tracing::info!(profile_id = %profile.id, "已创建匿名档案");
        Ok(profile)
    }

    fn record_sync_time(&self, at: DateTime<Utc>) -> StorageResult<()> {
        self.db.set_sync_metadata(META_LAST_SYNC_TIME, &at.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::model::AuthMethod;

    fn store() -> SqliteProfileStore {
        SqliteProfileStore::new(DatabaseManager::in_memory().expect("in-memory db"))
    }

    #[test]
    fn test_save_and_load_profile() {
        let store = store();
        let mut profile = LearnerProfile::new("user-1", AuthMethod::Authenticated, Utc::now());
        profile.display_name = Some("Amina".to_string());
        profile.progress.total_questions_answered = 12;

        store.save_profile(&profile).unwrap();
        let loaded = store.load_profile("user-1").unwrap().expect("profile saved");
        assert_eq!(loaded, profile);

        profile.progress.total_questions_answered = 20;
        store.save_profile(&profile).unwrap();
        let loaded = store.load_profile("user-1").unwrap().unwrap();
        assert_eq!(loaded.progress.total_questions_answered, 20);
        assert_eq!(store.profile_ids().unwrap(), vec!["user-1".to_string()]);
    }

    #[test]
    fn test_load_missing_profile_returns_none() {
        assert!(store().load_profile("nobody").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_payload_is_treated_as_absent() {
        let store = store();
        {
            let conn = store.db().get_connection();
            conn.execute(
                "INSERT INTO learner_profile (id, auth_method, payload, created_at, updated_at)
                 VALUES ('broken', 'anonymous', '{not json', '2024-01-01', '2024-01-01')",
                [],
            )
            .unwrap();
        }
        assert!(store.load_profile("broken").unwrap().is_none());
    }

    #[test]
    fn test_delete_profile_is_idempotent() {
        let store = store();
        let profile = LearnerProfile::new("user-1", AuthMethod::Anonymous, Utc::now());
        store.save_profile(&profile).unwrap();

        store.delete_profile("user-1").unwrap();
        store.delete_profile("user-1").unwrap();
        assert!(store.load_profile("user-1").unwrap().is_none());
    }

    #[test]
    fn test_anonymous_profile_is_created_once() {
        let store = store();
        let first = store.load_or_create_anonymous_profile().unwrap();
        let second = store.load_or_create_anonymous_profile().unwrap();

        assert!(first.is_anonymous());
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_active_profile_falls_back_to_anonymous() {
        let store = store();
        let anonymous = store.load_active_profile().unwrap();
        assert!(anonymous.is_anonymous());

        let signed_in = LearnerProfile::new("user-9", AuthMethod::Authenticated, Utc::now());
        store.save_profile(&signed_in).unwrap();
        store.set_active_profile("user-9").unwrap();
        assert_eq!(store.load_active_profile().unwrap().id, "user-9");

        store.delete_profile("user-9").unwrap();
        assert!(store.active_profile_id().unwrap().is_none());
        assert_eq!(store.load_active_profile().unwrap().id, anonymous.id);
    }

    #[test]
    fn test_record_sync_time() {
        let store = store();
        assert!(store.last_sync_time().unwrap().is_none());

        let now = Utc::now();
        store.record_sync_time(now).unwrap();
        let stored = store.last_sync_time().unwrap().unwrap();
        assert_eq!(stored.timestamp_millis(), now.timestamp_millis());
    }
}
