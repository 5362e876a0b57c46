//! 云端档案存储
//!
//! 定义远端存储接口及其 HTTP 实现。未找到不是错误：
//! 读取时返回 `None`，删除时视为成功。

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::progress::model::LearnerProfile;

// ============================================================
// 错误类型定义
// ============================================================

/// 远端存储错误类型
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("网络错误: {0}")]
    Network(String),

    #[error("云端数据无法解析: {0}")]
    Decode(String),

    #[error("云端返回 HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("操作已取消")]
    Cancelled,
}

pub type RemoteResult<T> = Result<T, RemoteError>;

// ============================================================
// RemoteStore - 远端存储接口
// ============================================================

/// 远端档案存储接口
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 读取云端档案；不存在时返回 None
    async fn fetch_profile(&self, id: &str) -> RemoteResult<Option<LearnerProfile>>;

    /// 保存档案，返回服务端确认后的副本（可能带有服务端写入的同步时间）
    async fn save_profile(&self, profile: &LearnerProfile) -> RemoteResult<LearnerProfile>;

    /// 删除云端档案；档案已不存在时同样返回成功
    async fn delete_profile(&self, id: &str) -> RemoteResult<()>;
}

// ============================================================
// HttpRemoteStore - HTTP 实现
// ============================================================

/// 远端存储配置
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// API 基础 URL
    pub api_base_url: String,
    /// 认证令牌
    pub auth_token: Option<String>,
    /// 请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            auth_token: None,
            timeout_secs: 30,
        }
    }
}

/// 基于 REST 接口的远端存储
///
/// 接口约定：`GET/PUT/DELETE {base}/api/profiles/{id}`，请求体与响应体均为档案 JSON。
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    config: RemoteConfig,
    client: Client,
}

impl HttpRemoteStore {
    /// 使用配置创建远端存储
    pub fn new(config: RemoteConfig) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RemoteError::Network(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self { config, client })
    }

    fn profile_url(&self, id: &str) -> String {
        format!(
            "{}/api/profiles/{}",
            self.config.api_base_url.trim_end_matches('/'),
            id
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn status_error(response: reqwest::Response, action: &str) -> RemoteError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        RemoteError::Status {
            status: status.as_u16(),
            message: format!("{}失败: {}", action, body),
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch_profile(&self, id: &str) -> RemoteResult<Option<LearnerProfile>> {
        let response = self
            .authorize(self.client.get(self.profile_url(id)))
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(profile_id = %id, "云端没有该档案");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::status_error(response, "获取云端档案").await);
        }

        response
            .json::<LearnerProfile>()
            .await
            .map(Some)
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn save_profile(&self, profile: &LearnerProfile) -> RemoteResult<LearnerProfile> {
        let response = self
            .authorize(self.client.put(self.profile_url(&profile.id)))
            .json(profile)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, "上传档案").await);
        }

        response
            .json::<LearnerProfile>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn delete_profile(&self, id: &str) -> RemoteResult<()> {
        let response = self
            .authorize(self.client.delete(self.profile_url(id)))
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Self::status_error(response, "删除云端档案").await)
    }
}
