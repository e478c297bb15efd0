//! Spoken announcements into the prison voice channel.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::AnnounceError;
use crate::platform::CommandContext;

/// A started announcement. Resolves once playback has ended, successfully or not.
#[derive(Debug)]
pub struct Announcement {
    done: oneshot::Receiver<Result<(), AnnounceError>>,
}

impl Announcement {
    pub fn new() -> (oneshot::Sender<Result<(), AnnounceError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { done: rx })
    }

    /// An announcement that has already finished, e.g. when it fell back to a chat message.
    pub fn completed(result: Result<(), AnnounceError>) -> Self {
        let (tx, announcement) = Self::new();
        let _ = tx.send(result);
        announcement
    }

    pub async fn finished(self) -> Result<(), AnnounceError> {
        self.done.await.unwrap_or(Err(AnnounceError::Interrupted))
    }
}

#[async_trait]
pub trait Announcer: Send + Sync {
    /// Start speaking `text` in the context's voice channel.
    async fn speak(&self, ctx: &CommandContext, text: &str) -> Result<Announcement, AnnounceError>;
}
