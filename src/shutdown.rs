use tokio::sync::broadcast;
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 广播一次性的关闭信号给所有组件（调度循环、HTTP服务器）。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self { shutdown_tx }
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        let subscriber_count = self.shutdown_tx.receiver_count();
        debug!("发送关闭信号给 {} 个订阅者", subscriber_count);
        // 可能没有接收者，忽略错误
        let _ = self.shutdown_tx.send(());
        info!("关闭信号已发送");
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_shutdown_signals_all_subscribers() {
        let manager = ShutdownManager::new();
        let mut rx1 = manager.subscribe();
        let mut rx2 = manager.subscribe();

        manager.shutdown();

        assert!(timeout(Duration::from_millis(100), rx1.recv()).await.is_ok());
        assert!(timeout(Duration::from_millis(100), rx2.recv()).await.is_ok());
    }

    #[tokio::test]
    async fn test_double_shutdown_is_harmless() {
        let manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        manager.shutdown();
        manager.shutdown();
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_ok());
    }
}
