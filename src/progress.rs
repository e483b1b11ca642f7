//! Progress bar fed by queue events.

use std::time::Duration;

use exdownloader_core::queue::{EntryStatus, GalleryQueue, QueueEvent};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

const BAR_TEMPLATE: &str = "{spinner} {prefix} [{bar:30}] {pos}/{len} {msg}";

/// Spawns the progress display when requested.
///
/// Returns `(handle, stop)`; cancel `stop` and await the handle to clear the bar.
pub(crate) fn spawn_progress_ui(
    enabled: bool,
    queue: &GalleryQueue,
) -> (Option<tokio::task::JoinHandle<()>>, CancellationToken) {
    let stop = CancellationToken::new();
    if !enabled {
        stop.cancel();
        return (None, stop);
    }
    let events = queue.subscribe();
    let handle = tokio::spawn(render(queue.clone(), events, stop.clone()));
    (Some(handle), stop)
}

async fn render(
    queue: GalleryQueue,
    mut events: tokio::sync::broadcast::Receiver<QueueEvent>,
    stop: CancellationToken,
) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    loop {
        let event = tokio::select! {
            () = stop.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(QueueEvent::StatusChanged { entry, status }) => {
                let Some(snapshot) = queue.entry(entry) else {
                    continue;
                };
                match status {
                    EntryStatus::Preparing => {
                        bar.set_length(u64::from(snapshot.gallery.page_count));
                        bar.set_position(0);
                        bar.set_prefix(snapshot.gallery.display_name.clone());
                        bar.set_message("resolving keys");
                    }
                    EntryStatus::Downloading => bar.set_message("downloading"),
                    EntryStatus::Completed => bar.set_message("done"),
                    EntryStatus::Waiting => bar.set_message("waiting"),
                }
            }
            Ok(QueueEvent::PageCompleted { entry, .. }) => {
                if let Some(snapshot) = queue.entry(entry) {
                    bar.set_position(snapshot.completed_pages() as u64);
                }
            }
            Ok(QueueEvent::Halted { reason, .. }) => bar.set_message(format!("halted: {reason}")),
            Ok(QueueEvent::Enqueued { .. }) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }

    bar.finish_and_clear();
}
