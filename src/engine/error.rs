// ==========================================
// 考勤对账引擎 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 畸形打卡与不可配对打卡属于非致命诊断, 不中断所在分组
// ==========================================

use crate::config::ConfigError;
use crate::domain::punch::GroupKey;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    // ===== 数据质量 (非致命) =====
    #[error("畸形打卡已隔离: punch_id={punch_id}, 原因={reason}")]
    MalformedPunch { punch_id: String, reason: String },

    #[error("打卡无法配对: punch_id={punch_id}, 原因={reason}")]
    UnpairablePunch { punch_id: String, reason: String },

    // ===== 并发控制 =====
    #[error("并发冲突: group={group}, 已重试 {attempts} 次")]
    ConcurrencyConflict { group: GroupKey, attempts: u32 },

    // ===== 持久化 =====
    #[error("持久化不可用, 批次停止提交: {0}")]
    PersistenceUnavailable(String),

    #[error("持久化失败: {0}")]
    Repository(#[from] RepositoryError),

    // ===== 配置 =====
    #[error("对账配置错误: {0}")]
    Config(#[from] ConfigError),

    // ===== 请求 =====
    #[error("请求参数非法: {0}")]
    InvalidRequest(String),

    // ===== 运行时 =====
    #[error("批次已取消")]
    Cancelled,

    #[error("工作线程异常: {0}")]
    Worker(String),
}

impl ReconcileError {
    /// 可重试失败 (打卡仍保持未处理, 下次批次自动重入)
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Repository(e) => e.is_retryable(),
            ReconcileError::ConcurrencyConflict { .. } => true,
            _ => false,
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
