//! 凭证文件备份
//!
//! 每次破坏性写入前生成时间点备份，并按保留天数滚动清理。
//! 备份文件命名 `accounts_{凭证数}_{时间戳}.toml.bak`，便于人工挑选恢复点。

use crate::error::StoreError;
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};

/// 备份管理器
#[derive(Debug, Clone)]
pub struct BackupKeeper {
    backup_dir: PathBuf,
    retention_days: u32,
}

impl BackupKeeper {
    /// 创建备份管理器，确保备份目录存在
    pub fn new(backup_dir: PathBuf, retention_days: u32) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&backup_dir).map_err(|e| {
            StoreError::WriteFailure(format!("无法创建备份目录 {:?}: {}", backup_dir, e))
        })?;
        Ok(Self {
            backup_dir,
            retention_days,
        })
    }

    /// 备份目录
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// 生成一份时间点备份
    ///
    /// `credential_count` 写入文件名，记录备份时刻的凭证数量
    pub fn backup_file(
        &self,
        source: &Path,
        credential_count: usize,
    ) -> Result<PathBuf, StoreError> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
        let backup_path = self
            .backup_dir
            .join(format!("accounts_{}_{}.toml.bak", credential_count, timestamp));

        std::fs::copy(source, &backup_path)
            .map_err(|e| StoreError::WriteFailure(format!("备份失败: {}", e)))?;

        tracing::debug!(
            "[凭证备份] 已生成备份: {:?} (凭证数: {})",
            backup_path.file_name().unwrap_or_default(),
            credential_count
        );
        Ok(backup_path)
    }

    /// 列出现有备份（按文件名排序，即按时间排序）
    pub fn list_backups(&self) -> Result<Vec<PathBuf>, StoreError> {
        let entries = std::fs::read_dir(&self.backup_dir)
            .map_err(|e| StoreError::ReadFailure(format!("无法读取备份目录: {}", e)))?;

        let mut backups = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".toml.bak"))
                .unwrap_or(false)
            {
                backups.push(path);
            }
        }
        backups.sort();
        Ok(backups)
    }

    /// 清理超过保留天数的旧备份
    pub fn cleanup_old_backups(&self) -> Result<(), StoreError> {
        let entries = std::fs::read_dir(&self.backup_dir)
            .map_err(|e| StoreError::ReadFailure(format!("无法读取备份目录: {}", e)))?;
        let cutoff = Utc::now() - Duration::days(self.retention_days as i64);

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let modified = DateTime::<Utc>::from(modified);
            if modified < cutoff {
                let _ = std::fs::remove_file(path);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_file_naming() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("accounts.toml");
        std::fs::write(&source, "[[accounts]]\nid = \"a\"\n").unwrap();

        let keeper = BackupKeeper::new(dir.path().join("backups"), 4).unwrap();
        let backup = keeper.backup_file(&source, 1).unwrap();

        let name = backup.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("accounts_1_"));
        assert!(name.ends_with(".toml.bak"));
        assert_eq!(
            std::fs::read_to_string(&backup).unwrap(),
            "[[accounts]]\nid = \"a\"\n"
        );
    }

    #[test]
    fn test_list_backups_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("accounts.toml");
        std::fs::write(&source, "x = 1\n").unwrap();

        let keeper = BackupKeeper::new(dir.path().join("backups"), 4).unwrap();
        keeper.backup_file(&source, 0).unwrap();
        keeper.backup_file(&source, 1).unwrap();

        let backups = keeper.list_backups().unwrap();
        assert_eq!(backups.len(), 2);
        assert!(backups[0] < backups[1]);
    }

    #[test]
    fn test_backup_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let keeper = BackupKeeper::new(dir.path().join("backups"), 4).unwrap();

        let result = keeper.backup_file(&dir.path().join("nope.toml"), 0);
        assert!(matches!(result, Err(StoreError::WriteFailure(_))));
    }
}
