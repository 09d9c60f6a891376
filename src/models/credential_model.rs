//! 凭证数据模型
//!
//! 定义凭证记录、凭证集合与生命周期/健康状态等核心类型。
//! 凭证集合持久化为单个 `accounts.toml` 文件（`[[accounts]]` 数组），
//! 保持人工可读、可 diff。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 生命周期状态
///
/// 状态机：`Active --冻结--> Frozen --解冻--> Active`；
/// `Frozen --冷却期结束--> Deleted`（终态）。
/// `Deleted` 只在物理删除前的内存中短暂出现，存储层校验会拒绝持久化它。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LifecycleState {
    /// 活跃，可参与轮换
    #[default]
    Active,
    /// 已冻结，冷却期结束后由清理任务物理删除
    Frozen {
        /// 冻结原因
        reason: String,
        /// 发起人
        requested_by: String,
        /// 冻结时间
        requested_at: DateTime<Utc>,
        /// 冷却期结束、允许物理删除的时间
        auto_delete_at: DateTime<Utc>,
    },
    /// 已删除（终态，仅存在于内存）
    Deleted,
}

impl LifecycleState {
    /// 冻结是否已到期（允许物理删除）
    pub fn freeze_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self, LifecycleState::Frozen { auto_delete_at, .. } if *auto_delete_at <= now)
    }
}

/// 健康状态 - 与冻结轴正交的开关
///
/// 被禁用的凭证不参与轮换，但不会被删除
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// 正常，可参与轮换
    #[default]
    Enabled,
    /// 已禁用（手动或自动封禁）
    Disabled,
}

/// 凭证健康信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CredentialHealth {
    /// 健康状态
    #[serde(default)]
    pub state: HealthState,
    /// 最近观察到的上游失败状态码（有界 FIFO）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_errors: Vec<u16>,
}

impl CredentialHealth {
    /// 记录一个上游状态码，超出容量时淘汰最旧的
    pub fn push_error(&mut self, status_code: u16, capacity: usize) {
        self.recent_errors.push(status_code);
        while self.recent_errors.len() > capacity {
            self.recent_errors.remove(0);
        }
    }
}

/// 调用计数
///
/// `window_calls` 驱动轮换触发，游标离开时清零；
/// `total_calls` 为累计值。计数在下一次持久化写入时顺带落盘。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CallCounters {
    /// 当前轮换窗口内的调用次数
    #[serde(default)]
    pub window_calls: u64,
    /// 累计调用次数
    #[serde(default)]
    pub total_calls: u64,
}

/// 凭证 - 一个上游账号授权
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    /// 稳定标识（账号邮箱或 subject）
    pub id: String,
    /// 创建时间
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// 最后使用时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    /// 生命周期状态
    #[serde(default)]
    pub lifecycle: LifecycleState,
    /// 调用计数
    #[serde(default)]
    pub counters: CallCounters,
    /// 健康信息
    #[serde(default)]
    pub health: CredentialHealth,
    /// 授权数据（OAuth token 等），池不解析其内容。
    /// 更新时整表替换，不做原地修改。
    #[serde(default)]
    pub auth: toml::value::Table,
}

impl Credential {
    /// 创建新凭证
    pub fn new(id: impl Into<String>, auth: toml::value::Table) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            last_used: None,
            lifecycle: LifecycleState::Active,
            counters: CallCounters::default(),
            health: CredentialHealth::default(),
            auth,
        }
    }

    /// 是否可参与轮换（活跃且未禁用）
    pub fn is_rotatable(&self) -> bool {
        matches!(self.lifecycle, LifecycleState::Active)
            && self.health.state == HealthState::Enabled
    }

    /// 是否处于冻结状态
    pub fn is_frozen(&self) -> bool {
        matches!(self.lifecycle, LifecycleState::Frozen { .. })
    }

    /// 更新最后使用时间
    pub fn mark_used(&mut self) {
        self.last_used = Some(Utc::now());
    }
}

/// 凭证集合 - 持久化的全量有序集合，按 `id` 唯一
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CredentialSet {
    /// 有序的凭证记录
    #[serde(default)]
    pub accounts: Vec<Credential>,
}

impl CredentialSet {
    /// 集合大小
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// 按 id 查找
    pub fn get(&self, id: &str) -> Option<&Credential> {
        self.accounts.iter().find(|c| c.id == id)
    }

    /// 按 id 查找（可变）
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Credential> {
        self.accounts.iter_mut().find(|c| c.id == id)
    }

    /// 是否包含指定 id
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// 按 id 幂等插入或更新，返回是否为新插入
    pub fn upsert(&mut self, credential: Credential) -> bool {
        match self.get_mut(&credential.id) {
            Some(existing) => {
                *existing = credential;
                false
            }
            None => {
                self.accounts.push(credential);
                true
            }
        }
    }

    /// 按 id 移除，返回被移除的记录
    pub fn remove(&mut self, id: &str) -> Option<Credential> {
        let pos = self.accounts.iter().position(|c| c.id == id)?;
        Some(self.accounts.remove(pos))
    }
}

/// 冻结发起人
///
/// 冻结是可逆、可审计的社区状态：任何人都可以解冻，
/// 但非账号所有者发起冻结时必须给出非空原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreezeActor {
    /// 账号所有者本人
    Owner,
    /// 其他发起人（管理员、社区成员）
    Other(String),
}

impl FreezeActor {
    /// 是否为账号所有者
    pub fn is_owner(&self) -> bool {
        matches!(self, FreezeActor::Owner)
    }

    /// 记录到冻结元数据中的名称
    pub fn name(&self) -> &str {
        match self {
            FreezeActor::Owner => "owner",
            FreezeActor::Other(name) => name,
        }
    }
}

/// 凭证状态概览 - 供管理面查询
#[derive(Debug, Clone, Serialize)]
pub struct CredentialOverview {
    /// 凭证 id
    pub id: String,
    /// 生命周期状态（含冻结元数据）
    pub lifecycle: LifecycleState,
    /// 健康状态
    pub health_state: HealthState,
    /// 最近的上游失败状态码
    pub recent_errors: Vec<u16>,
    /// 调用计数
    pub counters: CallCounters,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 最后使用时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl From<&Credential> for CredentialOverview {
    fn from(cred: &Credential) -> Self {
        Self {
            id: cred.id.clone(),
            lifecycle: cred.lifecycle.clone(),
            health_state: cred.health.state,
            recent_errors: cred.health.recent_errors.clone(),
            counters: cred.counters,
            created_at: cred.created_at,
            last_used: cred.last_used,
        }
    }
}
