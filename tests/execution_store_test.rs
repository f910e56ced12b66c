// ==========================================
// 会计数据导入管道 - 执行记录与对象存储集成测试
// ==========================================
// 覆盖: 文件/内存执行记录后端的一致语义、配对 ID、白名单更新、本地对象存储
// ==========================================

use contabilidad_ingesta::domain::execution::{ExecutionFilter, ExecutionUpdate, NewExecution};
use contabilidad_ingesta::domain::types::{ExecutionStatus, FileType};
use contabilidad_ingesta::repository::{
    ExecutionStore, FileExecutionStore, LocalStorageBackend, MemoryExecutionStore, RepositoryError,
    StorageBackend,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn journal(project: &str) -> NewExecution {
    NewExecution {
        file_type: FileType::Je,
        test_type: "libro_diario_import".into(),
        project_id: project.into(),
        period: Some("2024-12".into()),
        ..Default::default()
    }
}

fn trial_balance(parent: &str) -> NewExecution {
    NewExecution {
        file_type: FileType::Sys,
        test_type: "libro_diario_import".into(),
        project_id: "P-1".into(),
        parent_execution_id: Some(parent.into()),
        ..Default::default()
    }
}

async fn backends() -> (TempDir, Vec<Arc<dyn ExecutionStore>>) {
    let dir = TempDir::new().unwrap();
    let file = FileExecutionStore::open(dir.path().join("executions")).await.unwrap();
    let stores: Vec<Arc<dyn ExecutionStore>> = vec![Arc::new(MemoryExecutionStore::new()), Arc::new(file)];
    (dir, stores)
}

// ==========================================
// 测试1: 配对 ID 与 get_coordinated
// ==========================================
#[tokio::test]
async fn test_coordinated_pair_resolves_from_either_member() {
    let (_dir, stores) = backends().await;
    for store in stores {
        let parent = store.create_coordinated(journal("P-1")).await.unwrap();
        let child = store.create_coordinated(trial_balance(&parent.id)).await.unwrap();
        assert_eq!(child.id, format!("{}-ss", parent.id), "backend={}", store.backend_name());

        for id in [&parent.id, &child.id] {
            let pair = store.get_coordinated(id).await.unwrap();
            assert_eq!(pair.parent.as_ref().unwrap().id, parent.id);
            assert_eq!(pair.child.as_ref().unwrap().id, child.id);
        }

        let dup = store.create_coordinated(trial_balance(&parent.id)).await.unwrap_err();
        assert!(matches!(dup, RepositoryError::AlreadyExists { .. }));
    }
}

// ==========================================
// 测试2: update ∘ get 合并字段并推进 updatedAt
// ==========================================
#[tokio::test]
async fn test_update_merges_fields_and_advances_timestamp() {
    let (_dir, stores) = backends().await;
    for store in stores {
        let created = store.create(journal("P-2")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let update = ExecutionUpdate {
            output_file: Some("P-2/x/Je/auto/x_auto.csv".into()),
            manual_mapping_required: Some(true),
            ..ExecutionUpdate::status(ExecutionStatus::MappingRequired, "auto_mapping")
        };
        let updated = store.update(&created.id, update).await.unwrap();
        let loaded = store.get(&created.id).await.unwrap().unwrap();

        assert_eq!(loaded, updated);
        assert_eq!(loaded.status, ExecutionStatus::MappingRequired);
        assert_eq!(loaded.output_file.as_deref(), Some("P-2/x/Je/auto/x_auto.csv"));
        assert!(loaded.manual_mapping_required);
        assert!(loaded.updated_at > created.updated_at);
        // 未出现在更新中的字段保持不变
        assert_eq!(loaded.period, created.period);
        assert_eq!(loaded.created_at, created.created_at);
    }
}

// ==========================================
// 测试3: 白名单以外的字段不可更新
// ==========================================
#[test]
fn test_update_rejects_unknown_fields() {
    assert!(ExecutionUpdate::from_json(json!({"status": "mapped"})).is_ok());
    assert!(ExecutionUpdate::from_json(json!({"projectId": "otro"})).is_err());
    assert!(ExecutionUpdate::from_json(json!({"id": "x"})).is_err());
}

// ==========================================
// 测试4: 列表过滤与删除
// ==========================================
#[tokio::test]
async fn test_list_filter_and_delete() {
    let (_dir, stores) = backends().await;
    for store in stores {
        let parent = store.create_coordinated(journal("P-3")).await.unwrap();
        store.create_coordinated(trial_balance(&parent.id)).await.unwrap();
        store.create(journal("P-4")).await.unwrap();

        let sys = store
            .list(&ExecutionFilter {
                file_type: Some(FileType::Sys),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(sys.len(), 1);

        let children = store
            .list(&ExecutionFilter {
                parent_execution_id: Some(parent.id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(children.len(), 1);

        assert!(store.delete(&parent.id).await.unwrap());
        assert!(!store.delete(&parent.id).await.unwrap());
        assert!(store.get(&parent.id).await.unwrap().is_none());
        let err = store.require(&parent.id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }
}

// ==========================================
// 测试5: 本地对象存储
// ==========================================
#[tokio::test]
async fn test_local_storage_round_trip() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorageBackend::new(dir.path());

    let key = storage
        .put("uploads", "P-1/e1/Je/e1_diario_Je.csv", b"a;b\n1;2\n".to_vec())
        .await
        .unwrap();
    assert_eq!(key, "uploads/P-1/e1/Je/e1_diario_Je.csv");
    assert!(storage.exists("uploads", "P-1/e1/Je/e1_diario_Je.csv").await.unwrap());
    assert_eq!(
        storage.get("uploads", "P-1/e1/Je/e1_diario_Je.csv").await.unwrap(),
        b"a;b\n1;2\n".to_vec()
    );
    assert_eq!(
        storage.list("uploads", "P-1/e1").await.unwrap(),
        vec!["P-1/e1/Je/e1_diario_Je.csv".to_string()]
    );

    let missing = storage.get("uploads", "P-1/none.csv").await.unwrap_err();
    assert!(matches!(missing, RepositoryError::ObjectNotFound { .. }));
    assert!(storage.put("uploads", "../escape.csv", Vec::new()).await.is_err());

    assert!(storage.delete("uploads", "P-1/e1/Je/e1_diario_Je.csv").await.unwrap());
    assert!(!storage.delete("uploads", "P-1/e1/Je/e1_diario_Je.csv").await.unwrap());
}
