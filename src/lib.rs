//! 多账号上游凭证池生命周期管理
//!
//! 为多账号 API 网关提供凭证的持久化、轮换分发与冻结/删除生命周期：
//!
//! - [`store`]：`accounts.toml` 的原子替换写入、空覆盖防护与删除前备份
//! - [`pool`]：操作锁串行化的轮换队列、自动封禁与冻结/解冻
//! - [`sweeper`]：周期删除冷却期已过的冻结凭证的后台任务
//!
//! 典型用法：
//!
//! ```no_run
//! use credpool::{CredentialPool, CredentialStore, PoolConfig, start_sweep_task};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), credpool::PoolError> {
//! let store = Arc::new(CredentialStore::with_defaults()?);
//! let pool = Arc::new(CredentialPool::new(store, PoolConfig::default()));
//! pool.initialize().await;
//! let _sweeper = start_sweep_task(Arc::clone(&pool));
//!
//! if let Some(cred) = pool.get_valid_credential().await {
//!     // 用 cred.auth 调用上游
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod pool;
pub mod store;
pub mod sweeper;

pub use config::PoolConfig;
pub use error::{PoolError, StoreError};
pub use models::credential_model::{
    CallCounters, Credential, CredentialHealth, CredentialOverview, CredentialSet, FreezeActor,
    HealthState, LifecycleState,
};
pub use pool::CredentialPool;
pub use store::CredentialStore;
pub use sweeper::start_sweep_task;
