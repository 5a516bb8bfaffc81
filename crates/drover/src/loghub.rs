use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Which child pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogChannel {
    Stdout,
    Stderr,
}

impl fmt::Display for LogChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogChannel::Stdout => f.write_str("stdout"),
            LogChannel::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub channel: LogChannel,
    pub line: String,
}

struct SubscriberSlot {
    tx: mpsc::Sender<LogLine>,
    /// Lines dropped for this subscriber since its last successful delivery.
    dropped: u64,
}

struct HubState {
    tail: VecDeque<LogLine>,
    subscribers: Vec<SubscriberSlot>,
    closed: bool,
}

/// Per-process log fan-out.
///
/// Decouples the child's output rate from subscriber consumption: `publish`
/// never blocks, each subscriber has its own bounded queue, and a subscriber
/// that falls behind loses lines (announced by a gap marker) without ever
/// stalling the child or its peers. A bounded tail of recent lines is
/// replayed to late subscribers.
#[derive(Clone)]
pub struct LogHub {
    state: Arc<Mutex<HubState>>,
    tail_capacity: usize,
    queue_capacity: usize,
}

impl LogHub {
    pub fn new(tail_capacity: usize, queue_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                tail: VecDeque::with_capacity(tail_capacity),
                subscribers: Vec::new(),
                closed: false,
            })),
            tail_capacity,
            queue_capacity,
        }
    }

    fn gap_marker(dropped: u64) -> LogLine {
        LogLine {
            channel: LogChannel::Stdout,
            line: format!("-- gap: {dropped} lines dropped --"),
        }
    }

    /// Record one line and offer it to every live subscriber.
    ///
    /// Holds the hub lock only for the tail append and one try-send per
    /// subscriber; a full subscriber queue drops the line for that
    /// subscriber alone.
    pub fn publish(&self, channel: LogChannel, line: String) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.closed {
            return;
        }

        let entry = LogLine { channel, line };
        if self.tail_capacity > 0 {
            if state.tail.len() == self.tail_capacity {
                state.tail.pop_front();
            }
            state.tail.push_back(entry.clone());
        }

        state.subscribers.retain_mut(|sub| {
            if sub.dropped > 0 {
                match sub.tx.try_send(Self::gap_marker(sub.dropped)) {
                    Ok(()) => sub.dropped = 0,
                    Err(TrySendError::Full(_)) => {
                        sub.dropped += 1;
                        return true;
                    }
                    Err(TrySendError::Closed(_)) => return false,
                }
            }
            match sub.tx.try_send(entry.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    sub.dropped += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Register a new subscriber.
    ///
    /// The current tail is replayed into the fresh queue before any live
    /// line. Subscribing to a closed hub yields the tail and then ends.
    pub fn subscribe(&self) -> LogSubscriber {
        let (tx, rx) = mpsc::channel(self.queue_capacity.max(1));
        if let Ok(mut state) = self.state.lock() {
            for line in state.tail.iter() {
                if tx.try_send(line.clone()).is_err() {
                    break;
                }
            }
            if !state.closed {
                state.subscribers.push(SubscriberSlot { tx, dropped: 0 });
            }
        }
        LogSubscriber { rx }
    }

    /// Stop the hub: already-queued lines still drain to their subscribers,
    /// after which every handle ends. Later publishes are ignored.
    pub fn close(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.closed = true;
        state.subscribers.clear();
    }

    #[cfg(test)]
    fn tail_len(&self) -> usize {
        self.state.lock().map(|s| s.tail.len()).unwrap_or(0)
    }
}

/// Receiving end of one subscription; ends when the hub closes or the
/// handle is dropped.
pub struct LogSubscriber {
    rx: mpsc::Receiver<LogLine>,
}

impl LogSubscriber {
    pub async fn next(&mut self) -> Option<LogLine> {
        self.rx.recv().await
    }
}
