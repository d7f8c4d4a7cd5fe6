// ==========================================
// 考勤对账引擎 - 配置层
// ==========================================
// 职责: 对账规则配置的加载、校验与快照
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod config_reader;
pub mod reconcile_config;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use config_reader::ReconcileConfigReader;
pub use reconcile_config::{ConfigError, OvertimeTier, ReconcileConfig, TimeWindow};
