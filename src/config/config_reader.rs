// ==========================================
// 考勤对账引擎 - 对账配置读取 Trait
// ==========================================
// 职责: 定义对账引擎所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::reconcile_config::{ConfigError, ReconcileConfig};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

// ==========================================
// ReconcileConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
// 实现者: ReconcileConfig 自身（固定配置, 测试与离线重算使用）
#[async_trait]
pub trait ReconcileConfigReader: Send + Sync {
    /// 加载并校验对账配置
    ///
    /// # 返回
    /// - ReconcileConfig: 已通过 validate() 的配置
    ///
    /// # 错误
    /// - ConfigError::MissingKey: 必填项缺失（正常工时上限/加班档位/夜班窗口）
    /// - ConfigError::InvalidValue: 取值无法解析或不一致
    async fn load_reconcile_config(&self) -> Result<ReconcileConfig, ConfigError>;

    /// 获取配置快照（写入批次日志）
    ///
    /// # 默认实现
    /// - 序列化 load_reconcile_config() 的结果
    async fn config_snapshot(&self) -> Result<JsonValue, ConfigError> {
        let config = self.load_reconcile_config().await?;
        serde_json::to_value(&config).map_err(|e| ConfigError::Storage(e.to_string()))
    }
}

#[async_trait]
impl ReconcileConfigReader for ReconcileConfig {
    async fn load_reconcile_config(&self) -> Result<ReconcileConfig, ConfigError> {
        self.validate()?;
        Ok(self.clone())
    }
}
