//! 同步编排器
//!
//! 负责本地档案与云端档案的往返同步：
//! - 同一档案 ID 同时最多只有一次同步在进行（按档案加锁）
//! - 变更后的同步请求会被合并，排队中的请求只保留一个
//! - 同步可随时取消，取消后状态回到 idle
//! - 任何一步失败时状态为 failed(message)，本地数据保持不变

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::progress::model::LearnerProfile;
use crate::storage::{LocalStore, StorageError};
use crate::sync::cancel::CancelHandle;
use crate::sync::merge::{merge, MergeStrategy};
use crate::sync::remote::{RemoteError, RemoteStore};
use crate::sync::state::{StateTransition, SyncState, SyncStateMachine};

// ============================================================
// 错误与结果类型
// ============================================================

/// 同步错误类型
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("本地存储错误: {0}")]
    Storage(#[from] StorageError),

    #[error("云端错误: {0}")]
    Remote(RemoteError),

    #[error("同步已取消")]
    Cancelled,
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Cancelled => SyncError::Cancelled,
            other => SyncError::Remote(other),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// 单次同步的结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// 同步后（已写入本地）的档案
    pub profile: LearnerProfile,
    /// 云端同步前是否已有该档案
    pub remote_existed: bool,
    /// 是否执行了合并
    pub merged: bool,
    /// 使用的合并策略
    pub strategy: MergeStrategy,
    /// 同步耗时（毫秒）
    pub duration_ms: u64,
    /// 完成时间
    pub synced_at: DateTime<Utc>,
}

/// 对外发布的同步状态
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_sync_at: Option<DateTime<Utc>>,
}

// ============================================================
// 状态跟踪
// ============================================================

/// 状态机与进行中任务计数
///
/// 每次取消都会推进 `generation`，旧任务结束时不会再改写状态。
/// 并发同步中任一失败会保留在 `pending_failure`，最后一个任务结束时据此进入 failed。
struct StatusTracker {
    machine: SyncStateMachine,
    active: usize,
    generation: u64,
    pending_failure: Option<String>,
    last_sync_at: Option<DateTime<Utc>>,
}

impl StatusTracker {
    fn snapshot(&self) -> SyncStatus {
        SyncStatus {
            state: self.machine.state().clone(),
            last_sync_at: self.last_sync_at,
        }
    }
}

// ============================================================
// SyncOrchestrator
// ============================================================

struct Inner {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    tracker: Mutex<StatusTracker>,
    status_tx: watch::Sender<SyncStatus>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    queued: Mutex<HashSet<String>>,
    cancel: Mutex<CancelHandle>,
}

/// 同步编排器，可廉价克隆并在任务间共享
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// 创建编排器
    pub fn new(local: Arc<dyn LocalStore>, remote: Arc<dyn RemoteStore>) -> Self {
        let tracker = StatusTracker {
            machine: SyncStateMachine::new(),
            active: 0,
            generation: 0,
            pending_failure: None,
            last_sync_at: None,
        };
        let (status_tx, _) = watch::channel(tracker.snapshot());

        Self {
            inner: Arc::new(Inner {
                local,
                remote,
                tracker: Mutex::new(tracker),
                status_tx,
                locks: Mutex::new(HashMap::new()),
                queued: Mutex::new(HashSet::new()),
                cancel: Mutex::new(CancelHandle::new()),
            }),
        }
    }

    /// 以上次成功同步时间初始化状态（应用启动时从本地元数据恢复）
    pub fn with_last_sync_time(self, at: Option<DateTime<Utc>>) -> Self {
        {
            let mut tracker = self.inner.tracker.lock();
            tracker.last_sync_at = at;
            self.inner.status_tx.send_replace(tracker.snapshot());
        }
        self
    }

    // ========== 状态查询 ==========

    /// 当前同步状态
    pub fn status(&self) -> SyncStatus {
        self.inner.tracker.lock().snapshot()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status_tx.subscribe()
    }

    /// 最近的状态迁移记录
    pub fn history(&self) -> Vec<StateTransition> {
        self.inner.tracker.lock().machine.history().to_vec()
    }

    /// 是否有排队中的同步请求
    pub fn is_queued(&self, profile_id: &str) -> bool {
        self.inner.queued.lock().contains(profile_id)
    }

    /// 当前仍保留档案锁的档案数（有同步在运行或等待时才保留）
    pub fn locked_profile_count(&self) -> usize {
        self.inner.locks.lock().len()
    }

    // ========== 同步操作 ==========

    /// 使用 `newest` 策略同步档案
    pub async fn perform_sync(&self, profile: &LearnerProfile) -> SyncResult<SyncReport> {
        self.refresh_from_cloud(profile, MergeStrategy::Newest).await
    }

    /// 使用调用方指定的策略与云端同步
    pub async fn refresh_from_cloud(
        &self,
        profile: &LearnerProfile,
        strategy: MergeStrategy,
    ) -> SyncResult<SyncReport> {
        let cancel = self.current_cancel();
        let _guard = self.acquire(&profile.id, &cancel).await?;
        self.run_locked(profile, strategy, &cancel).await
    }

    /// 安排一次后台同步（本地变更后调用）
    ///
    /// 已有排队请求时直接合并；排队的任务在开始时重新读取本地最新档案。
    /// 没有运行时上下文时不做任何事。
    pub fn schedule_sync(&self, profile_id: &str) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(profile_id, "没有 tokio 运行时，跳过后台同步");
            return None;
        };

        if !self.inner.queued.lock().insert(profile_id.to_string()) {
            tracing::debug!(profile_id, "已有排队中的同步，请求已合并");
            return None;
        }

        let this = self.clone();
        let cancel = self.current_cancel();
        let profile_id = profile_id.to_string();

        Some(runtime.spawn(async move {
            let Ok(_guard) = this.acquire(&profile_id, &cancel).await else {
                tracing::debug!(profile_id = %profile_id, "排队中的同步已取消");
                return;
            };
            this.inner.queued.lock().remove(&profile_id);

            let profile = match this.inner.local.load_profile(&profile_id) {
                Ok(Some(profile)) => profile,
                Ok(None) => {
                    tracing::warn!(profile_id = %profile_id, "本地档案不存在，跳过同步");
                    return;
                }
                Err(e) => {
                    tracing::warn!(profile_id = %profile_id, error = %e, "读取本地档案失败，跳过同步");
                    return;
                }
            };

            if let Err(e) = this.run_locked(&profile, MergeStrategy::Newest, &cancel).await {
                tracing::warn!(profile_id = %profile_id, error = %e, "后台同步未完成");
            }
        }))
    }

    /// 取消进行中与排队中的同步，不返回错误
    pub fn cancel_sync(&self) {
        let previous = std::mem::take(&mut *self.inner.cancel.lock());
        previous.cancel();
        self.inner.queued.lock().clear();

        let mut tracker = self.inner.tracker.lock();
        tracker.generation = tracker.generation.wrapping_add(1);
        tracker.active = 0;
        tracker.pending_failure = None;
        if tracker.machine.state().is_syncing() {
            if let Err(e) = tracker.machine.complete("cancelled") {
                tracing::warn!(error = %e, "取消时状态迁移失败");
            }
        }
        self.inner.status_tx.send_replace(tracker.snapshot());
        tracing::info!("同步已取消");
    }

    /// 删除云端档案；云端已不存在时视为成功
    pub async fn delete_remote_profile(&self, profile_id: &str) -> SyncResult<()> {
        let cancel = self.current_cancel();
        let _guard = self.acquire(profile_id, &cancel).await?;

        let generation = self.begin(&format!("删除云端档案 {}", profile_id));
        let result = guarded(&cancel, self.inner.remote.delete_profile(profile_id)).await;
        self.finish(generation, &result, None);
        result
    }

    // ========== 内部实现 ==========

    fn current_cancel(&self) -> CancelHandle {
        self.inner.cancel.lock().clone()
    }

    fn profile_lock(&self, profile_id: &str) -> Arc<AsyncMutex<()>> {
        self.inner
            .locks
            .lock()
            .entry(profile_id.to_string())
            .or_default()
            .clone()
    }

    async fn acquire(&self, profile_id: &str, cancel: &CancelHandle) -> SyncResult<ProfileGuard> {
        let lock = self.profile_lock(profile_id);
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = lock.lock_owned() => Some(guard),
        };

        match acquired {
            Some(guard) => Ok(ProfileGuard {
                inner: self.inner.clone(),
                profile_id: profile_id.to_string(),
                guard: Some(guard),
            }),
            None => {
                release_lock(&self.inner, profile_id);
                Err(SyncError::Cancelled)
            }
        }
    }

    /// 调用方必须已持有该档案的锁
    async fn run_locked(
        &self,
        profile: &LearnerProfile,
        strategy: MergeStrategy,
        cancel: &CancelHandle,
    ) -> SyncResult<SyncReport> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let generation = self.begin(&format!("同步档案 {} ({})", profile.id, strategy.as_str()));
        let result = self.round_trip(profile, strategy, cancel).await;
        self.finish(
            generation,
            &result,
            result.as_ref().ok().map(|report| report.synced_at),
        );

        match &result {
            Ok(report) => tracing::info!(
                profile_id = %profile.id,
                strategy = strategy.as_str(),
                remote_existed = report.remote_existed,
                duration_ms = report.duration_ms,
                "同步完成"
            ),
            Err(SyncError::Cancelled) => {
                tracing::info!(profile_id = %profile.id, "同步已取消")
            }
            Err(e) => tracing::warn!(profile_id = %profile.id, error = %e, "同步失败"),
        }
        result
    }

    async fn round_trip(
        &self,
        profile: &LearnerProfile,
        strategy: MergeStrategy,
        cancel: &CancelHandle,
    ) -> SyncResult<SyncReport> {
        let started = Instant::now();

        let remote = guarded(cancel, self.inner.remote.fetch_profile(&profile.id)).await?;
        let remote_existed = remote.is_some();
        let merged = match &remote {
            Some(remote) => merge(profile, remote, strategy),
            None => {
                tracing::debug!(profile_id = %profile.id, "云端尚无档案，上传本地档案");
                profile.clone()
            }
        };

        let mut confirmed = guarded(cancel, self.inner.remote.save_profile(&merged)).await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let synced_at = Utc::now();
        if confirmed.metadata.last_synced_at.is_none() {
            confirmed.metadata.last_synced_at = Some(synced_at);
        }

        // 同步期间本地可能已有新的写入，此时与云端确认结果再合并一次，避免覆盖
        let to_store = match self.inner.local.load_profile(&profile.id)? {
            Some(current) if current.metadata.updated_at > profile.metadata.updated_at => {
                tracing::debug!(profile_id = %profile.id, "同步期间本地有更新，合并后保存");
                merge(&current, &confirmed, MergeStrategy::Newest)
            }
            _ => confirmed,
        };

        self.inner.local.save_profile(&to_store)?;
        self.inner.local.record_sync_time(synced_at)?;

        Ok(SyncReport {
            profile: to_store,
            remote_existed,
            merged: remote_existed,
            strategy,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            synced_at,
        })
    }

    fn begin(&self, reason: &str) -> u64 {
        let mut tracker = self.inner.tracker.lock();
        tracker.active += 1;
        if !tracker.machine.state().is_syncing() {
            tracker.pending_failure = None;
            if let Err(e) = tracker.machine.start_sync(reason) {
                tracing::warn!(error = %e, "同步状态迁移失败");
            }
            self.inner.status_tx.send_replace(tracker.snapshot());
        }
        tracker.generation
    }

    fn finish<T>(&self, generation: u64, result: &SyncResult<T>, synced_at: Option<DateTime<Utc>>) {
        let mut tracker = self.inner.tracker.lock();
        if tracker.generation != generation {
            return;
        }

        if let Some(at) = synced_at {
            tracker.last_sync_at = Some(at);
        }
        if let Err(e) = result {
            if !matches!(e, SyncError::Cancelled) && tracker.pending_failure.is_none() {
                tracker.pending_failure = Some(e.to_string());
            }
        }
        tracker.active = tracker.active.saturating_sub(1);
        if tracker.active > 0 || !tracker.machine.state().is_syncing() {
            self.inner.status_tx.send_replace(tracker.snapshot());
            return;
        }

        let transition = match (tracker.pending_failure.take(), result) {
            (Some(message), _) => tracker.machine.fail(message),
            (None, Err(SyncError::Cancelled)) => tracker.machine.complete("cancelled"),
            (None, _) => tracker.machine.complete("同步成功"),
        };
        if let Err(e) = transition {
            tracing::warn!(error = %e, "同步状态迁移失败");
        }
        self.inner.status_tx.send_replace(tracker.snapshot());
    }
}

/// 档案锁的持有凭证；释放后若无人等待，则从锁表中移除该档案
struct ProfileGuard {
    inner: Arc<Inner>,
    profile_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        self.guard.take();
        release_lock(&self.inner, &self.profile_id);
    }
}

/// 锁表本身是唯一持有者时删除条目；新的获取者在同一把表锁下克隆，不会丢失
fn release_lock(inner: &Inner, profile_id: &str) {
    let mut locks = inner.locks.lock();
    if locks
        .get(profile_id)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(profile_id);
    }
}

/// 远端调用与取消信号竞争
async fn guarded<T>(
    cancel: &CancelHandle,
    call: impl Future<Output = Result<T, RemoteError>>,
) -> SyncResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        result = call => result.map_err(SyncError::from),
    }
}
