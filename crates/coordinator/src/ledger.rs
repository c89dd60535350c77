use std::sync::Arc;

use taskmesh_core::{
    models::{WorkerRow, WorkerSummary},
    traits::WorkerStore,
};
use tracing::warn;

/// `workers` 表的尽力而为记账
///
/// 写入失败只记录日志，不影响RPC结果；没有配置存储时什么也不做。
#[derive(Clone, Default)]
pub struct WorkerLedger {
    store: Option<Arc<dyn WorkerStore>>,
}

impl WorkerLedger {
    pub fn new(store: Option<Arc<dyn WorkerStore>>) -> Self {
        Self { store }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn record(&self, summary: &WorkerSummary) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.upsert_worker(&WorkerRow::from(summary)).await {
            warn!("更新Worker记录 {} 失败: {}", summary.id, e);
        }
    }

    pub async fn mark_offline(&self, worker_ids: &[String]) {
        let Some(store) = &self.store else {
            return;
        };
        for worker_id in worker_ids {
            if let Err(e) = store.mark_worker_offline(worker_id).await {
                warn!("标记Worker {} 离线失败: {}", worker_id, e);
            }
        }
    }
}
