use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::formats::{Document, TranscriptionTask};
use crate::store::DocumentStore;

const QUEUE_DEPTH: usize = 32;

type Reply = oneshot::Sender<Result<Document>>;

/// Funnels every save through a single consumer so that saves against the
/// shared working copy never interleave.
#[derive(Debug, Clone)]
pub struct SaveQueue {
    sender: mpsc::Sender<(TranscriptionTask, Reply)>,
}

impl SaveQueue {
    /// Starts the consumer. It exits once every queue handle is dropped.
    pub fn spawn(store: Arc<DocumentStore>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<(TranscriptionTask, Reply)>(QUEUE_DEPTH);
        let consumer = tokio::spawn(async move {
            while let Some((task, reply)) = receiver.recv().await {
                let identifier = task.document.identifier.clone();
                let result = store.save(task).await;
                if let Err(err) = &result {
                    tracing::error!(%identifier, ?err, "save failed");
                }
                if reply.send(result).is_err() {
                    tracing::debug!(%identifier, "save requester went away");
                }
            }
            tracing::debug!("save queue closed");
        });
        (Self { sender }, consumer)
    }

    /// Enqueues `task` and waits for its save to finish.
    pub async fn submit(&self, task: TranscriptionTask) -> Result<Document> {
        let (reply, outcome) = oneshot::channel();
        self.sender
            .send((task, reply))
            .await
            .map_err(|_| Error::Transport("save queue is closed".to_owned()))?;
        outcome
            .await
            .map_err(|_| Error::Transport("save queue dropped the request".to_owned()))?
    }
}
