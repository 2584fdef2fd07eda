//! HTTP Worker传输
//!
//! 把分发载荷POST到已注册服务的 base_url。只确认接收；
//! 任务结果由Worker稍后通过回调接口上报。

use async_trait::async_trait;
use tracing::{debug, error};

use pipeweave_application::{DispatchRequest, WorkerTransport};
use pipeweave_domain::Service;
use pipeweave_errors::{OrchestratorError, OrchestratorResult};

pub struct HttpWorkerTransport {
    http_client: reqwest::Client,
}

impl HttpWorkerTransport {
    pub fn new(request_timeout: std::time::Duration) -> OrchestratorResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| OrchestratorError::Configuration(format!("构建HTTP客户端失败: {e}")))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl WorkerTransport for HttpWorkerTransport {
    async fn dispatch(
        &self,
        service: &Service,
        request: &DispatchRequest,
    ) -> OrchestratorResult<()> {
        let url = format!(
            "{}/api/tasks/execute",
            service.base_url.trim_end_matches('/')
        );

        match self.http_client.post(&url).json(request).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    debug!(
                        "运行 {} 已送达服务 {}: {}",
                        request.run_id, service.id, url
                    );
                    Ok(())
                } else {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    error!(
                        "服务 {} 拒绝了运行 {}: HTTP {} - {}",
                        service.id, request.run_id, status, body
                    );
                    Err(OrchestratorError::DispatchFailed(format!(
                        "worker returned HTTP {status}: {body}"
                    )))
                }
            }
            Err(e) => {
                error!("连接服务 {} 失败: {}", service.id, e);
                Err(OrchestratorError::DispatchFailed(format!(
                    "worker unreachable: {e}"
                )))
            }
        }
    }
}
