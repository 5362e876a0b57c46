//! 云端同步模块
//!
//! - `merge`：两份档案的纯函数合并
//! - `remote`：远端存储接口与 HTTP 实现
//! - `orchestrator`：同步编排（加锁、合并请求、取消、状态）

pub mod cancel;
pub mod merge;
pub mod orchestrator;
pub mod remote;
pub mod state;

pub use cancel::CancelHandle;
pub use merge::{merge, MergeStrategy};
pub use orchestrator::{SyncError, SyncOrchestrator, SyncReport, SyncResult, SyncStatus};
pub use remote::{HttpRemoteStore, RemoteConfig, RemoteError, RemoteResult, RemoteStore};
pub use state::{StateTransition, SyncState, SyncStateMachine};
