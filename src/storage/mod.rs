//! SQLite 本地存储模块
//!
//! 提供学习者档案的本地持久化，支持：
//! - 档案的原子写入与读取（离线时的唯一数据源）
//! - 匿名档案的自动创建
//! - 已用题目集合的版本化记录
//! - 同步元数据

// ============================================================
// 子模块声明
// ============================================================

pub mod migrations;
pub mod profile_store;
pub mod used_questions;

// ============================================================
// 重新导出主要类型
// ============================================================

pub use migrations::run_migrations;
pub use profile_store::{LocalStore, SqliteProfileStore};
pub use used_questions::SqliteUsedQuestionTracker;

// ============================================================
// 依赖导入
// ============================================================

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

// ============================================================
// 错误类型定义
// ============================================================

/// 存储模块错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("迁移错误: {0}")]
    Migration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

// ============================================================
// DatabaseManager - 数据库连接管理器
// ============================================================

/// 同步元数据键：匿名档案 ID
pub const META_ANONYMOUS_PROFILE_ID: &str = "anonymous_profile_id";
/// 同步元数据键：当前活动档案 ID
pub const META_ACTIVE_PROFILE_ID: &str = "active_profile_id";
/// 同步元数据键：上次成功同步时间
pub const META_LAST_SYNC_TIME: &str = "last_sync_time";

/// 数据库连接管理器
///
/// 连接由 `Arc<Mutex<_>>` 共享，档案仓储与已用题目记录器可以持有同一个连接。
#[derive(Clone)]
pub struct DatabaseManager {
    connection: Arc<Mutex<Connection>>,
}

impl DatabaseManager {
    /// 创建新的数据库管理器
    ///
    /// 自动创建父目录、启用 WAL 模式与外键约束，并运行数据库迁移。
    ///
    /// # Example
    /// ```ignore
    /// let db = DatabaseManager::new("./data/progress.db")?;
    /// ```
    pub fn new<P: AsRef<Path>>(db_path: P) -> StorageResult<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connection = Connection::open(path)?;

        // WAL：读操作不会被后台同步的写入阻塞
        connection.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;

        Self::with_connection(connection)
    }

    /// 内存数据库，测试与临时会话使用
    pub fn in_memory() -> StorageResult<Self> {
        let connection = Connection::open_in_memory()?;
        connection.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> StorageResult<Self> {
        migrations::run_migrations(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// 锁住共享连接；持锁期间其他仓储的读写会等待
    pub fn get_connection(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock()
    }

    /// 执行事务
    ///
    /// 闭包返回错误时事务回滚，调用方不会看到部分写入。
    pub fn transaction<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let mut conn = self.connection.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    // ========== 同步元数据操作 ==========

    /// 获取同步元数据
    pub fn get_sync_metadata(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.connection.lock();
        let value = conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 设置同步元数据（插入或更新）
    pub fn set_sync_metadata(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.connection.lock();
        conn.execute(
            r#"
            INSERT INTO sync_metadata (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            [key, value],
        )?;
        Ok(())
    }

    /// 删除同步元数据
    ///
    /// 返回是否删除了记录。
    pub fn delete_sync_metadata(&self, key: &str) -> StorageResult<bool> {
        let conn = self.connection.lock();
        let affected = conn.execute("DELETE FROM sync_metadata WHERE key = ?1", [key])?;
        Ok(affected > 0)
    }
}

// ============================================================
// 测试
// ============================================================
