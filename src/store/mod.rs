//! 凭证存储
//!
//! 持久化 `CredentialSet` 的唯一事实来源，保证不发生静默数据丢失：
//!
//! - 读失败返回 `ReadFailure`，永远不会伪装成空集合；
//! - 空集合禁止覆盖非空存储（防止瞬时读失败被放大成全量清空）；
//! - 所有写入走原子替换：写临时文件 → 备份原文件 → 改名落位，
//!   任一步失败都会回滚备份并丢弃临时产物；
//! - 破坏性删除前先生成时间点备份。

mod backup;

pub use backup::BackupKeeper;

use crate::error::StoreError;
use crate::models::credential_model::{Credential, CredentialSet, LifecycleState};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// 默认数据目录名
const DATA_DIR: &str = ".credpool";
/// 默认备份保留天数
const DEFAULT_RETENTION_DAYS: u32 = 4;

/// 凭证存储
pub struct CredentialStore {
    file_path: PathBuf,
    backup: BackupKeeper,
    /// 存储锁 - 串行化对文件的读-改-写序列。
    /// 与操作锁嵌套时必须先取操作锁，再取存储锁。
    write_lock: Mutex<()>,
    /// 测试注入：强制改名落位步骤失败
    #[cfg(test)]
    fail_swap: std::sync::atomic::AtomicBool,
    /// 测试注入：强制回滚备份步骤失败
    #[cfg(test)]
    fail_restore: std::sync::atomic::AtomicBool,
}

impl CredentialStore {
    /// 创建凭证存储
    pub fn new(
        file_path: PathBuf,
        backup_dir: PathBuf,
        retention_days: u32,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::WriteFailure(format!("无法创建数据目录 {:?}: {}", parent, e))
            })?;
        }
        Ok(Self {
            file_path,
            backup: BackupKeeper::new(backup_dir, retention_days)?,
            write_lock: Mutex::new(()),
            #[cfg(test)]
            fail_swap: std::sync::atomic::AtomicBool::new(false),
            #[cfg(test)]
            fail_restore: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// 使用默认路径创建：`~/.credpool/accounts.toml`
    pub fn with_defaults() -> Result<Self, StoreError> {
        let home = dirs::home_dir()
            .ok_or_else(|| StoreError::WriteFailure("无法获取主目录".to_string()))?;
        let data_dir = home.join(DATA_DIR);
        Self::new(
            data_dir.join("accounts.toml"),
            data_dir.join("backups"),
            DEFAULT_RETENTION_DAYS,
        )
    }

    /// 凭证文件路径
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// 备份目录
    pub fn backup_dir(&self) -> &Path {
        self.backup.backup_dir()
    }

    /// 列出现有的时间点备份
    pub fn list_backups(&self) -> Result<Vec<PathBuf>, StoreError> {
        self.backup.list_backups()
    }

    /// 读取持久化的凭证集合
    ///
    /// 文件不存在视为首次运行，返回空集合；文件存在但不可读/不可解析
    /// 返回 `ReadFailure`。调用方必须把 `ReadFailure` 当作「状态未知」
    /// 处理，绝不能据此回写存储。
    pub fn load(&self) -> Result<CredentialSet, StoreError> {
        if !self.file_path.exists() {
            return Ok(CredentialSet::default());
        }
        let content = std::fs::read_to_string(&self.file_path)
            .map_err(|e| StoreError::ReadFailure(format!("{:?}: {}", self.file_path, e)))?;
        toml::from_str(&content)
            .map_err(|e| StoreError::ReadFailure(format!("{:?}: {}", self.file_path, e)))
    }

    /// 校验集合形状：id 非空且唯一，不含已删除记录
    pub fn validate(set: &CredentialSet) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for cred in &set.accounts {
            if cred.id.trim().is_empty() {
                return Err(StoreError::ValidationFailure("存在空 id 的凭证".to_string()));
            }
            if !seen.insert(cred.id.as_str()) {
                return Err(StoreError::ValidationFailure(format!(
                    "凭证 id 重复: {}",
                    cred.id
                )));
            }
            if matches!(cred.lifecycle, LifecycleState::Deleted) {
                return Err(StoreError::ValidationFailure(format!(
                    "不允许持久化已删除的凭证: {}",
                    cred.id
                )));
            }
        }
        Ok(())
    }

    /// 持久化整个凭证集合
    ///
    /// 拒绝用空集合覆盖当前非空（或状态未知）的存储。
    pub async fn save(&self, set: &CredentialSet) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        Self::validate(set)?;
        self.guard_empty_overwrite(set)?;
        self.write_set(set)
    }

    /// 读-改-写单个凭证记录
    pub async fn update_one<F>(&self, id: &str, mutator: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Credential),
    {
        let _guard = self.write_lock.lock().await;
        let mut set = self.load()?;
        let cred = set
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        mutator(cred);
        Self::validate(&set)?;
        self.write_set(&set)
    }

    /// 破坏性删除单个凭证
    ///
    /// 删除提交前先生成全量文件的时间点备份。这是唯一允许把集合写空的
    /// 路径：每个成员都是被逐个显式移除的。
    pub async fn delete_one(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut set = self.load()?;
        if !set.contains(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }

        self.backup.backup_file(&self.file_path, set.len())?;
        set.remove(id);
        Self::validate(&set)?;
        self.write_set(&set)?;

        if let Err(e) = self.backup.cleanup_old_backups() {
            tracing::warn!("[凭证存储] 清理旧备份失败（非致命）: {}", e);
        }
        tracing::info!("[凭证存储] 已删除凭证: {}", id);
        Ok(())
    }

    /// 空集合覆盖非空存储的防护
    ///
    /// 当前文件不可解析时同样拒绝：状态未知必须按「可能有数据」处理。
    fn guard_empty_overwrite(&self, set: &CredentialSet) -> Result<(), StoreError> {
        if !set.is_empty() || !self.file_path.exists() {
            return Ok(());
        }
        match self.load() {
            Ok(existing) if existing.is_empty() => Ok(()),
            Ok(existing) => Err(StoreError::ValidationFailure(format!(
                "拒绝用空集合覆盖含 {} 条凭证的存储",
                existing.len()
            ))),
            Err(e) => Err(StoreError::ValidationFailure(format!(
                "存储状态未知，拒绝空集合覆盖: {}",
                e
            ))),
        }
    }

    /// 序列化并原子替换凭证文件
    ///
    /// 顺序：写 `.tmp` → 复制原文件到 `.bak` → 改名落位 → 删除 `.bak`。
    /// 改名失败时回滚备份并删除临时文件，保证读者看不到半成品。
    fn write_set(&self, set: &CredentialSet) -> Result<(), StoreError> {
        let content = toml::to_string_pretty(set)
            .map_err(|e| StoreError::WriteFailure(format!("序列化失败: {}", e)))?;

        let tmp_path = self.file_path.with_extension("toml.tmp");
        let bak_path = self.file_path.with_extension("toml.bak");

        std::fs::write(&tmp_path, &content)
            .map_err(|e| StoreError::WriteFailure(format!("写临时文件失败: {}", e)))?;

        let had_existing = self.file_path.exists();
        if had_existing {
            if let Err(e) = std::fs::copy(&self.file_path, &bak_path) {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(StoreError::WriteFailure(format!("备份原文件失败: {}", e)));
            }
        }

        match self.swap_into_place(&tmp_path) {
            Ok(()) => {
                if had_existing {
                    let _ = std::fs::remove_file(&bak_path);
                }
                Ok(())
            }
            Err(e) => {
                // 回滚成功才允许删除备份：双重故障时 .bak 是最后的恢复点
                if had_existing {
                    match self.restore_backup(&bak_path) {
                        Ok(()) => {
                            let _ = std::fs::remove_file(&bak_path);
                        }
                        Err(restore_err) => {
                            tracing::error!(
                                "[凭证存储] 回滚原文件失败，保留备份 {:?} 以供人工恢复: {}",
                                bak_path,
                                restore_err
                            );
                        }
                    }
                }
                let _ = std::fs::remove_file(&tmp_path);
                Err(StoreError::WriteFailure(format!("改名落位失败: {}", e)))
            }
        }
    }

    fn swap_into_place(&self, tmp_path: &Path) -> std::io::Result<()> {
        #[cfg(test)]
        if self.fail_swap.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(std::io::Error::other("注入的改名失败"));
        }
        std::fs::rename(tmp_path, &self.file_path)
    }

    fn restore_backup(&self, bak_path: &Path) -> std::io::Result<()> {
        #[cfg(test)]
        if self.fail_restore.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(std::io::Error::other("注入的回滚失败"));
        }
        std::fs::copy(bak_path, &self.file_path).map(|_| ())
    }

    #[cfg(test)]
    fn set_fail_swap(&self, fail: bool) {
        self.fail_swap
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn set_fail_restore(&self, fail: bool) {
        self.fail_restore
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests;
