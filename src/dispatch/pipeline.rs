use super::messenger::Messenger;
use super::post::{DispatchJob, RenderedMessage, Renderer};
use futures::stream::{self, Stream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Worker counts for the two stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub render_concurrency: usize,
    pub send_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            render_concurrency: 7,
            send_concurrency: 3,
        }
    }
}

/// Delivery counts since the pipeline started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicUsize,
    failed: AtomicUsize,
}

struct Outgoing {
    target: String,
    message: RenderedMessage,
}

/// Submits jobs to a running [`Pipeline`]. Cheap to clone.
#[derive(Clone)]
pub struct PipelineHandle {
    jobs: mpsc::UnboundedSender<DispatchJob>,
}

impl PipelineHandle {
    /// Queues `job`. Never blocks; returns `false` if the pipeline has shut down.
    pub fn submit(&self, job: DispatchJob) -> bool {
        self.jobs.send(job).is_ok()
    }
}

/// Render stage feeding a send stage through a channel.
///
/// Each stage runs up to its own number of jobs at once and queues the rest,
/// so a slow send never holds up rendering and vice versa.
pub struct Pipeline {
    jobs: mpsc::UnboundedSender<DispatchJob>,
    render_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl Pipeline {
    pub fn start(config: PipelineConfig, renderer: Renderer, messenger: Arc<dyn Messenger>) -> Self {
        let (jobs, job_rx) = mpsc::unbounded_channel::<DispatchJob>();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel::<Outgoing>();
        let counters = Arc::new(Counters::default());

        let render_limit = config.render_concurrency.max(1);
        let render_task = tokio::spawn(async move {
            receiver_stream(job_rx)
                .for_each_concurrent(render_limit, |job| {
                    let renderer = renderer.clone();
                    let outgoing = outgoing.clone();
                    async move {
                        let message = renderer.render(&job).await;
                        tracing::debug!(
                            feed = %job.feed_title,
                            link = job.entry.link.as_deref().unwrap_or_default(),
                            "Rendered entry"
                        );
                        let next = Outgoing {
                            target: job.target,
                            message,
                        };
                        if outgoing.send(next).is_err() {
                            tracing::warn!("Send stage stopped, dropping rendered message");
                        }
                    }
                })
                .await;
        });

        let send_limit = config.send_concurrency.max(1);
        let send_counters = Arc::clone(&counters);
        let send_task = tokio::spawn(async move {
            receiver_stream(outgoing_rx)
                .for_each_concurrent(send_limit, |item| {
                    let messenger = Arc::clone(&messenger);
                    let counters = Arc::clone(&send_counters);
                    async move {
                        match messenger.deliver(&item.target, &item.message).await {
                            Ok(()) => {
                                counters.delivered.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                counters.failed.fetch_add(1, Ordering::Relaxed);
                                tracing::warn!(
                                    target_id = %item.target,
                                    link = item.message.link.as_deref().unwrap_or_default(),
                                    error = %e,
                                    "Delivery failed"
                                );
                            }
                        }
                    }
                })
                .await;
        });

        Self {
            jobs,
            render_task,
            send_task,
            counters,
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            jobs: self.jobs.clone(),
        }
    }

    /// Stops accepting jobs and waits for everything queued to be delivered.
    ///
    /// Outstanding [`PipelineHandle`]s keep the pipeline open; drop them first.
    pub async fn finish(self) -> DispatchStats {
        drop(self.jobs);
        if let Err(e) = self.render_task.await {
            tracing::warn!(error = %e, "Render stage ended abnormally");
        }
        if let Err(e) = self.send_task.await {
            tracing::warn!(error = %e, "Send stage ended abnormally");
        }
        DispatchStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

fn receiver_stream<T>(rx: mpsc::UnboundedReceiver<T>) -> impl Stream<Item = T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}
