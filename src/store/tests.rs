//! 存储层测试
//!
//! 覆盖原子替换、空覆盖防护、读失败隔离与序列化往返

use crate::error::StoreError;
use crate::models::credential_model::{
    Credential, CredentialHealth, CredentialSet, HealthState, LifecycleState,
};
use crate::store::CredentialStore;
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::path::Path;

fn store_in(dir: &Path) -> CredentialStore {
    CredentialStore::new(
        dir.join("accounts.toml"),
        dir.join("backups"),
        4,
    )
    .unwrap()
}

fn sample(id: &str) -> Credential {
    let mut auth = toml::value::Table::new();
    auth.insert(
        "access_token".to_string(),
        toml::Value::String(format!("token-{id}")),
    );
    auth.insert(
        "refresh_token".to_string(),
        toml::Value::String(format!("refresh-{id}")),
    );
    Credential::new(id, auth)
}

fn sample_set(ids: &[&str]) -> CredentialSet {
    let mut set = CredentialSet::default();
    for id in ids {
        set.upsert(sample(id));
    }
    set
}

#[tokio::test]
async fn test_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    let mut set = sample_set(&["alice@example.com", "bob@example.com", "carol@example.com"]);
    // 混入非默认状态，确保所有字段都参与往返
    set.get_mut("bob@example.com").unwrap().lifecycle = LifecycleState::Frozen {
        reason: "配额滥用".to_string(),
        requested_by: "admin".to_string(),
        requested_at: Utc::now(),
        auto_delete_at: Utc::now() + Duration::hours(24),
    };
    let carol = set.get_mut("carol@example.com").unwrap();
    carol.health.state = HealthState::Disabled;
    carol.health.recent_errors = vec![403, 429];
    carol.counters.total_calls = 42;

    store.save(&set).await.unwrap();
    let loaded = store.load().unwrap();

    assert_eq!(loaded, set);
    // 顺序保持
    assert_eq!(
        loaded.accounts.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
        vec!["alice@example.com", "bob@example.com", "carol@example.com"]
    );
}

#[tokio::test]
async fn test_missing_file_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let set = store.load().unwrap();
    assert!(set.is_empty());
}

#[tokio::test]
async fn test_corrupt_file_is_read_failure_not_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    std::fs::write(store.file_path(), "[[accounts]\nid = 破损").unwrap();

    let result = store.load();
    assert!(matches!(result, Err(StoreError::ReadFailure(_))));
}

#[tokio::test]
async fn test_empty_never_overwrites_nonempty() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    store.save(&sample_set(&["a", "b"])).await.unwrap();
    let before = std::fs::read_to_string(store.file_path()).unwrap();

    let result = store.save(&CredentialSet::default()).await;
    assert!(matches!(result, Err(StoreError::ValidationFailure(_))));

    // 磁盘内容原封不动
    let after = std::fs::read_to_string(store.file_path()).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_empty_save_refused_when_state_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    // 现有文件损坏 = 状态未知，必须按「可能有数据」处理
    std::fs::write(store.file_path(), "not toml at all {{{").unwrap();

    let result = store.save(&CredentialSet::default()).await;
    assert!(matches!(result, Err(StoreError::ValidationFailure(_))));
}

#[tokio::test]
async fn test_empty_save_allowed_on_first_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    store.save(&CredentialSet::default()).await.unwrap();
    assert!(store.load().unwrap().is_empty());
}

#[tokio::test]
async fn test_swap_failure_restores_original_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    store.save(&sample_set(&["a", "b"])).await.unwrap();
    let original = std::fs::read_to_string(store.file_path()).unwrap();

    store.set_fail_swap(true);
    let result = store.save(&sample_set(&["a", "b", "c"])).await;
    assert!(matches!(result, Err(StoreError::WriteFailure(_))));

    // 原内容逐字节恢复，且不遗留临时产物
    assert_eq!(std::fs::read_to_string(store.file_path()).unwrap(), original);
    assert!(!store.file_path().with_extension("toml.tmp").exists());
    assert!(!store.file_path().with_extension("toml.bak").exists());

    // 故障解除后写入恢复正常
    store.set_fail_swap(false);
    store.save(&sample_set(&["a", "b", "c"])).await.unwrap();
    assert_eq!(store.load().unwrap().len(), 3);
}

#[tokio::test]
async fn test_double_fault_preserves_backup_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    store.save(&sample_set(&["a", "b"])).await.unwrap();
    let original = std::fs::read_to_string(store.file_path()).unwrap();

    // 改名落位与回滚先后失败：.bak 是最后的恢复点，必须保留
    store.set_fail_swap(true);
    store.set_fail_restore(true);
    let result = store.save(&sample_set(&["a", "b", "c"])).await;
    assert!(matches!(result, Err(StoreError::WriteFailure(_))));

    let bak_path = store.file_path().with_extension("toml.bak");
    assert!(bak_path.exists());
    assert_eq!(std::fs::read_to_string(&bak_path).unwrap(), original);
}

#[tokio::test]
async fn test_update_one_touches_single_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    store.save(&sample_set(&["a", "b"])).await.unwrap();

    store
        .update_one("a", |cred| {
            cred.health.state = HealthState::Disabled;
            cred.counters.total_calls = 9;
        })
        .await
        .unwrap();

    let loaded = store.load().unwrap();
    assert_eq!(loaded.get("a").unwrap().health.state, HealthState::Disabled);
    assert_eq!(loaded.get("a").unwrap().counters.total_calls, 9);
    assert_eq!(loaded.get("b").unwrap().health.state, HealthState::Enabled);
}

#[tokio::test]
async fn test_update_one_unknown_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    store.save(&sample_set(&["a"])).await.unwrap();

    let result = store.update_one("ghost", |_| {}).await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_delete_one_backs_up_before_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    store.save(&sample_set(&["a", "b"])).await.unwrap();

    store.delete_one("a").await.unwrap();

    let loaded = store.load().unwrap();
    assert!(!loaded.contains("a"));
    assert!(loaded.contains("b"));

    // 删除前的时间点备份存在，且内容包含被删除的凭证
    let backups = store.list_backups().unwrap();
    assert_eq!(backups.len(), 1);
    let backup_content = std::fs::read_to_string(&backups[0]).unwrap();
    assert!(backup_content.contains("\"a\""));
}

#[tokio::test]
async fn test_delete_last_credential_may_drain_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    store.save(&sample_set(&["only"])).await.unwrap();

    // 逐个显式删除是唯一允许把文件写空的路径
    store.delete_one("only").await.unwrap();
    assert!(store.load().unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_one_unknown_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    store.save(&sample_set(&["a"])).await.unwrap();

    let result = store.delete_one("ghost").await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
    assert!(store.list_backups().unwrap().is_empty());
}

#[test]
fn test_validate_rejects_bad_shapes() {
    let mut dup = sample_set(&["a"]);
    dup.accounts.push(sample("a"));
    assert!(matches!(
        CredentialStore::validate(&dup),
        Err(StoreError::ValidationFailure(_))
    ));

    let empty_id = sample_set(&[" "]);
    assert!(matches!(
        CredentialStore::validate(&empty_id),
        Err(StoreError::ValidationFailure(_))
    ));

    let mut deleted = sample_set(&["a"]);
    deleted.get_mut("a").unwrap().lifecycle = LifecycleState::Deleted;
    assert!(matches!(
        CredentialStore::validate(&deleted),
        Err(StoreError::ValidationFailure(_))
    ));

    assert!(CredentialStore::validate(&sample_set(&["a", "b"])).is_ok());
}

// ============================================================================
// 序列化往返属性测试
// ============================================================================

fn arb_lifecycle() -> impl Strategy<Value = LifecycleState> {
    prop_oneof![
        Just(LifecycleState::Active),
        (
            "[a-zA-Z0-9 ]{1,24}",
            "[a-z0-9@.]{3,20}",
            0i64..=2_000_000_000i64,
            1i64..=86_400_000i64,
        )
            .prop_map(|(reason, requested_by, at, cooling)| {
                let requested_at = Utc.timestamp_opt(at, 0).unwrap();
                LifecycleState::Frozen {
                    reason,
                    requested_by,
                    requested_at,
                    auto_delete_at: requested_at + Duration::seconds(cooling),
                }
            }),
    ]
}

fn arb_credential() -> impl Strategy<Value = Credential> {
    (
        "[a-z0-9._-]{1,16}@[a-z]{2,8}\\.com",
        arb_lifecycle(),
        prop_oneof![Just(HealthState::Enabled), Just(HealthState::Disabled)],
        proptest::collection::vec(100u16..600u16, 0..6),
        0u64..10_000u64,
        0u64..100u64,
        "[a-zA-Z0-9/_=+-]{0,64}",
    )
        .prop_map(
            |(id, lifecycle, state, recent_errors, total, window, token)| {
                let mut auth = toml::value::Table::new();
                if !token.is_empty() {
                    auth.insert("access_token".to_string(), toml::Value::String(token));
                }
                let mut cred = Credential::new(id, auth);
                cred.lifecycle = lifecycle;
                cred.health = CredentialHealth {
                    state,
                    recent_errors,
                };
                cred.counters.total_calls = total;
                cred.counters.window_calls = window;
                cred
            },
        )
}

proptest! {
    /// 任意合法凭证集合：序列化再解析得到相同集合（id、字段、顺序均保持）
    #[test]
    fn prop_credential_set_round_trip(creds in proptest::collection::vec(arb_credential(), 0..8)) {
        let mut set = CredentialSet::default();
        for cred in creds {
            set.upsert(cred);
        }

        let text = toml::to_string_pretty(&set).unwrap();
        let parsed: CredentialSet = toml::from_str(&text).unwrap();
        prop_assert_eq!(parsed, set);
    }
}
