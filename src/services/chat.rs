use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::engine::ChatContext;
use crate::providers::StreamEvent;

/// One dispatched send or regenerate.
#[derive(Debug, Clone)]
pub struct StreamJob {
    pub session_id: String,
    pub placeholder_id: String,
    pub prompt: String,
    pub context: ChatContext,
    pub cancel: CancellationToken,
}

/// Progress of a stream job, addressed by session and placeholder id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Fragment {
        session_id: String,
        message_id: String,
        text: String,
    },
    Finished {
        session_id: String,
        message_id: String,
    },
    Failed {
        session_id: String,
        message_id: String,
        error: String,
    },
}

impl StreamUpdate {
    pub fn message_id(&self) -> &str {
        match self {
            StreamUpdate::Fragment { message_id, .. }
            | StreamUpdate::Finished { message_id, .. }
            | StreamUpdate::Failed { message_id, .. } => message_id,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            StreamUpdate::Fragment { session_id, .. }
            | StreamUpdate::Finished { session_id, .. }
            | StreamUpdate::Failed { session_id, .. } => session_id,
        }
    }
}

/// Run a stream job, reporting each fragment through `on_update` in arrival order.
///
/// Exactly one terminal update (`Finished` or `Failed`) is emitted last.
pub async fn run_streaming<F>(job: StreamJob, mut on_update: F)
where
    F: FnMut(StreamUpdate) + Send,
{
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);

    let StreamJob {
        session_id,
        placeholder_id: message_id,
        prompt,
        context,
        cancel,
    } = job;

    let provider = context.provider();
    let request = context.request(&prompt);
    let handle = tokio::spawn(async move {
        if let Err(e) = provider.stream_message(request, tx.clone()).await {
            let _ = tx.send(StreamEvent::Error(e.to_string())).await;
        }
    });

    let mut received = false;
    let terminal = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                handle.abort();
                break if received {
                    None
                } else {
                    Some("Generation stopped".to_string())
                };
            }
            event = rx.recv() => match event {
                Some(StreamEvent::Token(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    received = true;
                    on_update(StreamUpdate::Fragment {
                        session_id: session_id.clone(),
                        message_id: message_id.clone(),
                        text,
                    });
                }
                Some(StreamEvent::Done) => break None,
                Some(StreamEvent::Error(error)) => break Some(error),
                None => {
                    break if received {
                        None
                    } else {
                        Some("Stream ended unexpectedly".to_string())
                    };
                }
            },
        }
    };

    match terminal {
        None => on_update(StreamUpdate::Finished {
            session_id,
            message_id,
        }),
        Some(error) => {
            tracing::warn!("Stream for {} failed: {}", message_id, error);
            on_update(StreamUpdate::Failed {
                session_id,
                message_id,
                error,
            });
        }
    }
}
