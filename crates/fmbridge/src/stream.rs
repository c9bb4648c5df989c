use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::engine::SnapshotStream;
use crate::models::chunk::StreamChunk;

/// Turns the engine's cumulative snapshots into deltas
#[derive(Debug, Default)]
pub struct DeltaTracker {
    /// The furthest snapshot already sent, as the caller has it
    frontier: String,
}

impl DeltaTracker {
    /// The text `current` adds beyond what has already been sent, if any.
    ///
    /// A snapshot that only shrinks the output sends nothing, and regrowing to
    /// text already sent sends nothing either. When the engine rewrites text
    /// the caller already has, that text cannot be taken back: only the
    /// rewritten tail after the common prefix is sent.
    pub fn delta(&mut self, current: String) -> Option<String> {
        let common = common_prefix_len(&self.frontier, &current);
        if common == current.len() {
            return None;
        }

        if common < self.frontier.len() {
            tracing::debug!(
                kept = common,
                sent = self.frontier.len(),
                "engine revised output that was already sent"
            );
        }
        let delta = current[common..].to_string();
        self.frontier = current;
        Some(delta)
    }
}

/// Length in bytes of the longest common prefix, on a char boundary
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, x), y)| x != y)
        .map(|((index, _), _)| index)
        .unwrap_or_else(|| a.len().min(b.len()))
}

/// Map a snapshot stream to chunks: deltas, then exactly one `Done` or `Error`
pub fn deltas(mut snapshots: SnapshotStream) -> BoxStream<'static, StreamChunk> {
    Box::pin(async_stream::stream! {
        let mut tracker = DeltaTracker::default();
        while let Some(update) = snapshots.next().await {
            match update {
                Ok(current) => {
                    if let Some(delta) = tracker.delta(current) {
                        yield StreamChunk::Delta(delta);
                    }
                }
                Err(e) => {
                    tracing::error!("Generation failed mid-stream: {}", e);
                    yield StreamChunk::Error(e.to_string());
                    return;
                }
            }
        }
        yield StreamChunk::Done;
    })
}

/// Drive `chunks` on a spawned task and hand back the receiving end.
///
/// Dropping the receiver stops delivery at the next chunk; the engine stream
/// is dropped with the task.
pub fn spawn_channel<S>(chunks: S, capacity: usize) -> ReceiverStream<StreamChunk>
where
    S: Stream<Item = StreamChunk> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    tokio::spawn(async move {
        futures::pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            let terminal = chunk.is_terminal();
            if tx.send(chunk).await.is_err() {
                tracing::debug!("Chunk receiver dropped, abandoning stream");
                break;
            }
            if terminal {
                break;
            }
        }
    });

    ReceiverStream::new(rx)
}
