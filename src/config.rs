//! 凭证池配置
//!
//! 轮换阈值、冷却期、致命状态码集合与清理间隔。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认触发禁用的上游状态码（授权已失效类错误）
pub const FATAL_STATUS_CODES: &[u16] = &[401, 403];

/// 凭证池配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// 轮换阈值：单个凭证在一个窗口内被使用多少次后轮换到下一个
    pub rotation_threshold: u64,
    /// 冷却期（秒）：冻结到允许物理删除之间的强制延迟
    pub cooling_off_secs: u64,
    /// 清理任务执行间隔（秒）
    pub sweep_interval_secs: u64,
    /// 触发自动禁用的上游状态码
    #[serde(default = "default_fatal_codes")]
    pub fatal_status_codes: Vec<u16>,
    /// 每个凭证保留的最近错误码条数
    #[serde(default = "default_max_recent_errors")]
    pub max_recent_errors: usize,
}

fn default_fatal_codes() -> Vec<u16> {
    FATAL_STATUS_CODES.to_vec()
}

fn default_max_recent_errors() -> usize {
    10
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            rotation_threshold: 50,
            cooling_off_secs: 24 * 3600,
            sweep_interval_secs: 3600,
            fatal_status_codes: default_fatal_codes(),
            max_recent_errors: default_max_recent_errors(),
        }
    }
}

impl PoolConfig {
    /// 状态码是否属于致命集合
    pub fn is_fatal(&self, status_code: u16) -> bool {
        self.fatal_status_codes.contains(&status_code)
    }

    /// 冷却期时长
    pub fn cooling_off(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooling_off_secs as i64)
    }

    /// 清理间隔时长
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
