//! 错误类型
//!
//! 定义存储层与凭证池的错误分类。
//! 读失败与「空集合」严格区分：`load` 的失败永远不会被降级为空结果。

use thiserror::Error;

/// 存储层错误
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// 凭证文件不可读或不可解析（状态未知，调用方不得据此覆写存储）
    #[error("凭证文件读取失败: {0}")]
    ReadFailure(String),

    /// 写入前校验被拒绝（如空集合覆盖非空存储），未发生任何 I/O
    #[error("凭证集校验失败: {0}")]
    ValidationFailure(String),

    /// 原子替换过程中 I/O 失败，备份已回滚
    #[error("凭证文件写入失败: {0}")]
    WriteFailure(String),

    /// 指定 id 的凭证不存在
    #[error("凭证不存在: {0}")]
    NotFound(String),
}

/// 凭证池错误
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    /// 存储层错误
    #[error("凭证存储错误: {0}")]
    Store(#[from] StoreError),

    /// 指定 id 的凭证不在池中
    #[error("凭证不存在: {0}")]
    CredentialNotFound(String),

    /// 冻结请求校验失败（非所有者发起且未给出原因）
    #[error("冻结请求无效: {0}")]
    InvalidFreezeRequest(String),
}

impl PoolError {
    /// 是否为存储 I/O 类错误（调用方应保留内存状态，不得清空）
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            PoolError::Store(StoreError::ReadFailure(_))
                | PoolError::Store(StoreError::WriteFailure(_))
        )
    }
}
