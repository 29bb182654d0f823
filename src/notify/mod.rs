//! Dispatch of transition events.
//!
//! The tracker only returns events; everything user-visible happens here.
//! A `NotifierSet` fans each frame's events out to every registered notifier in
//! event order. A failing notifier is logged and skipped, never fatal to the loop.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::Sender;

use crate::{OccupancyStatus, TransitionEvent};

#[cfg(feature = "notify-mqtt")]
mod mqtt;
#[cfg(feature = "notify-mqtt")]
pub use mqtt::{MqttNotifier, MqttNotifierConfig};

/// Consumer of transition events.
pub trait Notifier: Send {
    /// Notifier identifier, used in log lines.
    fn name(&self) -> &'static str;

    /// Deliver one event observed on frame `frame_index`.
    fn notify(&mut self, frame_index: u64, event: &TransitionEvent) -> Result<()>;

    /// Called once after each frame's events have been delivered.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Ordered fan-out over notifiers.
#[derive(Default)]
pub struct NotifierSet {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<N: Notifier + 'static>(&mut self, notifier: N) {
        self.notifiers.push(Box::new(notifier));
    }

    pub fn with<N: Notifier + 'static>(mut self, notifier: N) -> Self {
        self.register(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }

    /// Deliver a frame's events. Returns the number of failed deliveries.
    pub fn dispatch(&mut self, frame_index: u64, events: &[TransitionEvent]) -> usize {
        if events.is_empty() {
            return 0;
        }
        let mut failures = 0;
        for notifier in &mut self.notifiers {
            for event in events {
                if let Err(e) = notifier.notify(frame_index, event) {
                    log::warn!("notifier {} failed on {}: {:#}", notifier.name(), event.spot, e);
                    failures += 1;
                }
            }
            if let Err(e) = notifier.flush() {
                log::warn!("notifier {} flush failed: {:#}", notifier.name(), e);
                failures += 1;
            }
        }
        failures
    }
}

// -------------------- log --------------------

/// Logs `Spot 3 is now FREE` at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&mut self, _frame_index: u64, event: &TransitionEvent) -> Result<()> {
        log::info!("{}", headline(event));
        Ok(())
    }
}

/// Human-readable one-liner for an event.
pub fn headline(event: &TransitionEvent) -> String {
    format!(
        "{} is now {}",
        event.spot,
        event.status.as_str().to_ascii_uppercase()
    )
}

// -------------------- JSON lines --------------------

#[derive(Debug, Serialize)]
struct EventRecord {
    frame: u64,
    spot: u32,
    name: String,
    status: OccupancyStatus,
    previous: Option<OccupancyStatus>,
}

impl EventRecord {
    fn new(frame_index: u64, event: &TransitionEvent) -> Self {
        Self {
            frame: frame_index,
            spot: event.spot.get(),
            name: event.spot.to_string(),
            status: event.status,
            previous: event.previous,
        }
    }
}

/// One JSON object per event, newline separated.
pub struct JsonLinesNotifier<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesNotifier<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesNotifier<BufWriter<File>> {
    /// Append to `path`, creating it if needed.
    pub fn append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> Notifier for JsonLinesNotifier<W> {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn notify(&mut self, frame_index: u64, event: &TransitionEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &EventRecord::new(frame_index, event))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

// -------------------- channel --------------------

/// Forwards events to another thread.
pub struct ChannelNotifier {
    tx: Sender<(u64, TransitionEvent)>,
}

impl ChannelNotifier {
    pub fn new(tx: Sender<(u64, TransitionEvent)>) -> Self {
        Self { tx }
    }
}

impl Notifier for ChannelNotifier {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn notify(&mut self, frame_index: u64, event: &TransitionEvent) -> Result<()> {
        self.tx
            .send((frame_index, *event))
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SpotId;
    use std::sync::mpsc;

    fn event(
        id: u32,
        status: OccupancyStatus,
        previous: Option<OccupancyStatus>,
    ) -> TransitionEvent {
        TransitionEvent {
            spot: SpotId(id),
            status,
            previous,
        }
    }

    struct Failing;

    impl Notifier for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn notify(&mut self, _frame_index: u64, _event: &TransitionEvent) -> Result<()> {
            Err(anyhow::anyhow!("offline"))
        }
    }

    #[test]
    fn headline_matches_toast_wording() {
        let e = event(3, OccupancyStatus::Free, Some(OccupancyStatus::Occupied));
        assert_eq!(headline(&e), "Spot 3 is now FREE");
    }

    #[test]
    fn json_lines_record_shape() -> Result<()> {
        let mut notifier = JsonLinesNotifier::new(Vec::new());
        notifier.notify(12, &event(3, OccupancyStatus::Occupied, Some(OccupancyStatus::Free)))?;
        notifier.notify(12, &event(4, OccupancyStatus::Free, None))?;
        let out = String::from_utf8(notifier.into_inner())?;
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            r#"{"frame":12,"spot":3,"name":"Spot 3","status":"occupied","previous":"free"}"#
        );
        assert_eq!(
            lines[1],
            r#"{"frame":12,"spot":4,"name":"Spot 4","status":"free","previous":null}"#
        );
        Ok(())
    }

    #[test]
    fn failing_notifier_does_not_block_others() {
        let (tx, rx) = mpsc::channel();
        let mut set = NotifierSet::new().with(Failing).with(ChannelNotifier::new(tx));
        let events = [
            event(1, OccupancyStatus::Free, None),
            event(2, OccupancyStatus::Occupied, None),
        ];
        assert_eq!(set.dispatch(5, &events), 2);

        let received: Vec<(u64, TransitionEvent)> = rx.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].1.spot, SpotId(1));
        assert_eq!(received[1].1.spot, SpotId(2));
        assert_eq!(set.names(), vec!["failing", "channel"]);
    }
}
