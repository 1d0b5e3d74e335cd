use tokio::sync::mpsc;

/// Things that invalidate the calendar snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    CommitCompleted { external_id: String },
    LoginCompleted,
}

#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<TurnEvent>,
}

impl EventBus {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<TurnEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    pub async fn emit(&self, event: TurnEvent) {
        let _ = self.tx.send(event).await;
    }
}
