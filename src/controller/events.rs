use std::path::PathBuf;
use tokio::sync::{Mutex, mpsc};

/// 每个订阅者的通道容量
pub const SUBSCRIBER_CAPACITY: usize = 256;

/// 进度事件。流以 Complete 或 Error 结束
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Output(String),
    Complete(Vec<PathBuf>),
    Error(String),
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Complete(_) | ProgressEvent::Error(_))
    }
}

#[derive(Default)]
struct HubState {
    history: Vec<ProgressEvent>,
    subscribers: Vec<mpsc::Sender<ProgressEvent>>,
    closed: bool,
}

/// 事件中心：保存完整历史，并向每个订阅者的有界通道推送
///
/// 发布方在通道满时等待（背压）；订阅者离开后自动移除；迟到的订阅者先收到历史事件
#[derive(Default)]
pub struct EventHub {
    state: Mutex<HubState>,
    /// 保证多个发布方之间的顺序一致
    publish_order: Mutex<()>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, event: ProgressEvent) {
        let _order = self.publish_order.lock().await;

        let senders = {
            let mut state = self.state.lock().await;
            if state.closed {
                tracing::debug!(?event, "event published after the stream ended");
                return;
            }
            state.history.push(event.clone());
            if event.is_terminal() {
                state.closed = true;
                std::mem::take(&mut state.subscribers)
            } else {
                state.subscribers.clone()
            }
        };

        let mut gone = Vec::new();
        for sender in &senders {
            if sender.send(event.clone()).await.is_err() {
                gone.push(sender.clone());
            }
        }

        if !gone.is_empty() {
            let mut state = self.state.lock().await;
            state
                .subscribers
                .retain(|s| !gone.iter().any(|g| g.same_channel(s)));
        }
    }

    /// 订阅：先回放历史，再接收后续事件
    pub async fn subscribe(&self) -> mpsc::Receiver<ProgressEvent> {
        let mut state = self.state.lock().await;
        let capacity = SUBSCRIBER_CAPACITY.max(state.history.len() + 1);
        let (tx, rx) = mpsc::channel(capacity);
        for event in &state.history {
            // 容量足够容纳全部历史
            let _ = tx.try_send(event.clone());
        }
        if !state.closed {
            state.subscribers.push(tx);
        }
        rx
    }

    pub async fn history(&self) -> Vec<ProgressEvent> {
        self.state.lock().await.history.clone()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}
