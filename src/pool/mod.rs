//! 凭证池
//!
//! 请求分发侧消费的轮换与健康状态权威。所有变更操作经由单一操作锁
//! 串行化（单写者结构，不做无锁技巧——这里的正确性靠严格串行，
//! 不靠吞吐）。每个需要跨重启存活的变更都经由 `CredentialStore` 落盘；
//! 轮换队列本身永不持久化，始终可由凭证集合重建。

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::models::credential_model::{
    Credential, CredentialOverview, CredentialSet, FreezeActor, HealthState, LifecycleState,
};
use crate::store::CredentialStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

/// 凭证池
pub struct CredentialPool {
    store: Arc<CredentialStore>,
    config: PoolConfig,
    /// 操作锁 - 锁内只做内存变更与本地文件 I/O，
    /// 不做上游网络调用（token 刷新等慢操作在锁外进行）
    inner: Mutex<PoolInner>,
}

/// 池的内存状态：凭证集合 + 轮换队列 + 游标
#[derive(Default)]
struct PoolInner {
    set: CredentialSet,
    /// 轮换队列：当前活跃且未禁用的凭证 id 子序列
    rotation: Vec<String>,
    /// 下一个使用的队列下标
    cursor: usize,
}

impl PoolInner {
    /// 按集合顺序重建轮换队列，尽量让游标停留在原凭证上
    fn rebuild_rotation(&mut self) {
        let current = self.rotation.get(self.cursor).cloned();
        self.rotation = self
            .set
            .accounts
            .iter()
            .filter(|c| c.is_rotatable())
            .map(|c| c.id.clone())
            .collect();
        self.cursor = current
            .and_then(|id| self.rotation.iter().position(|r| *r == id))
            .unwrap_or(0);
    }

    fn remove_from_rotation(&mut self, id: &str) {
        if let Some(pos) = self.rotation.iter().position(|r| r == id) {
            self.rotation.remove(pos);
            if pos < self.cursor {
                self.cursor -= 1;
            }
            if self.cursor >= self.rotation.len() {
                self.cursor = 0;
            }
        }
    }

    fn ensure_in_rotation(&mut self, id: &str) {
        if !self.rotation.iter().any(|r| r == id) {
            self.rotation.push(id.to_string());
        }
    }

    /// 游标前移（带环绕），离开的凭证窗口计数清零
    fn advance_cursor(&mut self) {
        if let Some(id) = self.rotation.get(self.cursor).cloned() {
            if let Some(cred) = self.set.get_mut(&id) {
                cred.counters.window_calls = 0;
            }
        }
        if !self.rotation.is_empty() {
            self.cursor = (self.cursor + 1) % self.rotation.len();
        }
    }
}

impl CredentialPool {
    /// 创建凭证池（空状态，需调用 `initialize` 加载）
    pub fn new(store: Arc<CredentialStore>, config: PoolConfig) -> Self {
        Self {
            store,
            config,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// 池配置
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// 底层存储
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// 从存储加载凭证集合并重建轮换队列，返回加载的凭证数
    ///
    /// 读失败时以空池降级启动且不回写存储——失败安全，而非失败清空。
    pub async fn initialize(&self) -> usize {
        let mut inner = self.inner.lock().await;
        match self.store.load() {
            Ok(set) => {
                inner.set = set;
                inner.rotation.clear();
                inner.cursor = 0;
                inner.rebuild_rotation();
                tracing::info!(
                    "[凭证池] 已加载 {} 条凭证，其中 {} 条可轮换",
                    inner.set.len(),
                    inner.rotation.len()
                );
                inner.set.len()
            }
            Err(e) => {
                tracing::error!(
                    "[凭证池] 凭证文件不可读，以空池降级启动（不回写存储）: {}",
                    e
                );
                inner.set = CredentialSet::default();
                inner.rotation.clear();
                inner.cursor = 0;
                0
            }
        }
    }

    /// 按 id 幂等插入或更新凭证，立即可被轮换使用
    ///
    /// 返回是否为新插入。持久化失败时内存状态保持不变。
    pub async fn add_or_update(&self, credential: Credential) -> Result<bool, PoolError> {
        let id = credential.id.clone();
        let rotatable = credential.is_rotatable();

        let mut inner = self.inner.lock().await;
        let mut staged = inner.set.clone();
        let inserted = staged.upsert(credential);
        self.store.save(&staged).await?;
        inner.set = staged;

        if rotatable {
            inner.ensure_in_rotation(&id);
        } else {
            inner.remove_from_rotation(&id);
        }
        tracing::info!(
            "[凭证池] {}凭证: {}",
            if inserted { "新增" } else { "更新" },
            id
        );
        Ok(inserted)
    }

    /// 取当前轮换位置的凭证
    ///
    /// 窗口计数达到轮换阈值时先前移游标（带环绕）。队列为空返回
    /// `None`（这是合法的池状态，不是错误）。此路径不做磁盘 I/O。
    pub async fn get_valid_credential(&self) -> Option<Credential> {
        let mut inner = self.inner.lock().await;
        if inner.rotation.is_empty() {
            return None;
        }

        let threshold = self.config.rotation_threshold.max(1);
        for _ in 0..inner.rotation.len() {
            let id = inner.rotation[inner.cursor].clone();
            let window = inner
                .set
                .get(&id)
                .map(|c| c.counters.window_calls)
                .unwrap_or(0);
            if window < threshold {
                break;
            }
            inner.advance_cursor();
        }

        let id = inner.rotation[inner.cursor].clone();
        let cred = inner.set.get_mut(&id)?;
        cred.counters.window_calls += 1;
        cred.counters.total_calls += 1;
        cred.mark_used();
        Some(cred.clone())
    }

    /// 记录上游失败状态码
    ///
    /// 致命状态码触发自动禁用并移出轮换（但绝不删除）。冻结优先于
    /// 自动封禁：冻结中的凭证只记录错误码，状态不变。
    pub async fn mark_credential_error(
        &self,
        id: &str,
        status_code: u16,
    ) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().await;
        let Some(cred) = inner.set.get(id) else {
            return Err(PoolError::CredentialNotFound(id.to_string()));
        };

        let should_disable = self.config.is_fatal(status_code)
            && !cred.is_frozen()
            && cred.health.state == HealthState::Enabled;
        let max_recent = self.config.max_recent_errors;

        if should_disable {
            let mut staged = inner.set.clone();
            if let Some(c) = staged.get_mut(id) {
                c.health.push_error(status_code, max_recent);
                c.health.state = HealthState::Disabled;
            }
            self.store.save(&staged).await?;
            inner.set = staged;
            inner.remove_from_rotation(id);
            tracing::warn!(
                "[凭证池] 凭证 {} 命中致命状态码 {}，已自动禁用并移出轮换",
                id,
                status_code
            );
        } else if let Some(c) = inner.set.get_mut(id) {
            c.health.push_error(status_code, max_recent);
        }
        Ok(())
    }

    /// 无条件前移轮换游标
    ///
    /// 分发失败后调用，避免立刻重试同一个凭证。
    pub async fn force_rotate_credential(&self) {
        let mut inner = self.inner.lock().await;
        if inner.rotation.is_empty() {
            return;
        }
        inner.advance_cursor();
    }

    /// 冻结凭证，进入冷却期
    ///
    /// 非所有者发起必须给出非空原因。冻结只移出轮换，不移出集合；
    /// 重复冻结保持原冷却计划不变。
    pub async fn freeze(
        &self,
        id: &str,
        reason: &str,
        actor: FreezeActor,
    ) -> Result<(), PoolError> {
        if !actor.is_owner() && reason.trim().is_empty() {
            return Err(PoolError::InvalidFreezeRequest(format!(
                "非所有者 {} 发起冻结必须填写原因",
                actor.name()
            )));
        }

        let mut inner = self.inner.lock().await;
        let Some(cred) = inner.set.get(id) else {
            return Err(PoolError::CredentialNotFound(id.to_string()));
        };
        if cred.is_frozen() {
            tracing::debug!("[凭证池] 凭证 {} 已处于冻结状态，保持原冷却计划", id);
            return Ok(());
        }

        let now = Utc::now();
        let auto_delete_at = now + self.config.cooling_off();
        let mut staged = inner.set.clone();
        if let Some(c) = staged.get_mut(id) {
            c.lifecycle = LifecycleState::Frozen {
                reason: reason.to_string(),
                requested_by: actor.name().to_string(),
                requested_at: now,
                auto_delete_at,
            };
        }
        self.store.save(&staged).await?;
        inner.set = staged;
        inner.remove_from_rotation(id);
        tracing::info!(
            "[凭证池] 凭证 {} 已冻结 (发起人: {})，{} 后可被物理删除",
            id,
            actor.name(),
            auto_delete_at
        );
        Ok(())
    }

    /// 解冻凭证
    ///
    /// 冻结是可逆、可审计的状态，任何人都可以解冻。健康的凭证
    /// 恢复集合顺序中的轮换位置。
    pub async fn unfreeze(&self, id: &str) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().await;
        let Some(cred) = inner.set.get(id) else {
            return Err(PoolError::CredentialNotFound(id.to_string()));
        };
        if !cred.is_frozen() {
            return Ok(());
        }

        let mut staged = inner.set.clone();
        if let Some(c) = staged.get_mut(id) {
            c.lifecycle = LifecycleState::Active;
        }
        self.store.save(&staged).await?;
        inner.set = staged;
        inner.rebuild_rotation();
        tracing::info!("[凭证池] 凭证 {} 已解冻", id);
        Ok(())
    }

    /// 手动启用/禁用凭证（与冻结轴正交的健康开关）
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().await;
        if !inner.set.contains(id) {
            return Err(PoolError::CredentialNotFound(id.to_string()));
        }

        let mut staged = inner.set.clone();
        if let Some(c) = staged.get_mut(id) {
            c.health.state = if enabled {
                HealthState::Enabled
            } else {
                HealthState::Disabled
            };
        }
        self.store.save(&staged).await?;
        inner.set = staged;
        inner.rebuild_rotation();
        tracing::info!(
            "[凭证池] 凭证 {} 已{}",
            id,
            if enabled { "启用" } else { "禁用" }
        );
        Ok(())
    }

    /// 管理删除：绕过冷却期直接物理删除
    ///
    /// 仅供管理面使用；自动错误处理只冻结，绝不直接删除。
    /// 走存储层的「先备份后删除」路径，误操作可在文件系统层恢复。
    pub async fn remove(&self, id: &str) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().await;
        if !inner.set.contains(id) {
            return Err(PoolError::CredentialNotFound(id.to_string()));
        }

        self.store.delete_one(id).await?;
        inner.set.remove(id);
        inner.remove_from_rotation(id);
        tracing::info!("[凭证池] 已管理删除凭证: {}", id);
        Ok(())
    }

    /// 状态概览，供管理面查询
    pub async fn overview(&self) -> Vec<CredentialOverview> {
        let inner = self.inner.lock().await;
        inner.set.accounts.iter().map(CredentialOverview::from).collect()
    }

    /// 删除所有冷却期已过的冻结凭证，返回删除数量
    ///
    /// 由清理任务周期调用；与前台操作共用操作锁，不会与并发的
    /// 冻结/解冻/新增竞争。幂等：已解冻的凭证不在冻结集合中，自然跳过。
    pub async fn sweep_expired_freezes(&self) -> Result<usize, PoolError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let expired: Vec<String> = inner
            .set
            .accounts
            .iter()
            .filter(|c| c.lifecycle.freeze_expired(now))
            .map(|c| c.id.clone())
            .collect();

        let mut deleted = 0usize;
        for id in expired {
            // 终态只在内存中短暂出现：删除提交前标记，失败则回退为冻结
            let previous = inner.set.get(&id).map(|c| c.lifecycle.clone());
            if let Some(c) = inner.set.get_mut(&id) {
                c.lifecycle = LifecycleState::Deleted;
            }
            match self.store.delete_one(&id).await {
                Ok(()) => {
                    inner.set.remove(&id);
                    inner.remove_from_rotation(&id);
                    deleted += 1;
                    tracing::info!("[清理任务] 凭证 {} 冷却期已过，已物理删除", id);
                }
                Err(e) => {
                    if let (Some(c), Some(prev)) = (inner.set.get_mut(&id), previous) {
                        c.lifecycle = prev;
                    }
                    tracing::error!("[清理任务] 删除凭证 {} 失败，保留冻结状态: {}", id, e);
                }
            }
        }
        Ok(deleted)
    }
}
