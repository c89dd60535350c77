use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{WorkerSubmitRequest, WorkerSubmitResponse};
use crate::SchedulerResult;

/// 协调器持有的Worker连接句柄
#[async_trait]
pub trait WorkerEndpoint: Send + Sync {
    /// 把任务交给Worker，Worker入队后立即返回
    async fn submit_task(
        &self,
        request: &WorkerSubmitRequest,
    ) -> SchedulerResult<WorkerSubmitResponse>;

    /// 释放连接，Worker被驱逐时调用
    fn close(&self) {}
}

/// 根据心跳中的地址为新Worker打开连接句柄
pub trait WorkerConnector: Send + Sync {
    fn connect(&self, worker_id: &str, address: &str) -> Arc<dyn WorkerEndpoint>;
}
