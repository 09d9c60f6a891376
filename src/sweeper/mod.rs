//! 生命周期清理任务
//!
//! 周期扫描凭证池，物理删除冷却期已过的冻结凭证。单轮失败只记录
//! 日志并等待下一轮，任务本身不退出。

use crate::pool::CredentialPool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// 启动后台清理任务，间隔取自池配置的 `sweep_interval_secs`
///
/// 首个 tick 立即触发，重启后堆积的过期冻结会被马上补扫。
/// 返回的句柄可用于在关停时中止任务。
pub fn start_sweep_task(pool: Arc<CredentialPool>) -> JoinHandle<()> {
    let interval = pool.config().sweep_interval();
    tokio::spawn(async move {
        tracing::info!("[清理任务] 已启动，间隔 {:?}", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match pool.sweep_expired_freezes().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("[清理任务] 本轮删除 {} 条过期冻结凭证", n),
                Err(e) => tracing::error!("[清理任务] 本轮清理失败，等待下一轮: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::models::credential_model::{Credential, FreezeActor};
    use crate::store::CredentialStore;
    use std::time::Duration;

    fn sample(id: &str) -> Credential {
        let mut auth = toml::value::Table::new();
        auth.insert(
            "access_token".to_string(),
            toml::Value::String(format!("token-{id}")),
        );
        Credential::new(id, auth)
    }

    async fn pool_in(dir: &std::path::Path, cooling_off_secs: u64) -> Arc<CredentialPool> {
        let store =
            CredentialStore::new(dir.join("accounts.toml"), dir.join("backups"), 4).unwrap();
        let config = PoolConfig {
            cooling_off_secs,
            sweep_interval_secs: 1,
            ..PoolConfig::default()
        };
        let pool = Arc::new(CredentialPool::new(Arc::new(store), config));
        pool.initialize().await;
        pool
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_deletes_expired_freeze() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path(), 0).await;
        pool.add_or_update(sample("expired")).await.unwrap();
        pool.add_or_update(sample("kept")).await.unwrap();
        pool.freeze("expired", "", FreezeActor::Owner).await.unwrap();

        let handle = start_sweep_task(Arc::clone(&pool));
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.abort();

        let loaded = pool.store().load().unwrap();
        assert!(!loaded.contains("expired"));
        assert!(loaded.contains("kept"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_spares_unexpired_freeze() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path(), 3600).await;
        pool.add_or_update(sample("a")).await.unwrap();
        pool.freeze("a", "", FreezeActor::Owner).await.unwrap();

        let handle = start_sweep_task(Arc::clone(&pool));
        // 多个清理周期过去，冷却期内的冻结必须原样保留
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.abort();

        assert!(pool.store().load().unwrap().get("a").unwrap().is_frozen());
    }
}
