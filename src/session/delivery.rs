// SPDX-License-Identifier: GPL-3.0-only

//! Delivery loop draining the frame queue on its own thread
//!
//! Sources push events into a bounded queue from their capture threads. A
//! single delivery thread drains it and calls the session's frame handler,
//! so at most one handler invocation is ever in flight. The thread owns the
//! sink while running and hands it back when joined.

use super::StopSignal;
use crate::backends::types::{Delivery, FrameEvent};
use crate::constants::timing;
use crate::sinks::FrameSink;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

/// What the delivery thread returns when it exits
pub(crate) struct DeliveryOutcome {
    pub sink: Box<dyn FrameSink>,
    pub delivered: u64,
}

/// Controller for the delivery thread of one session
pub(crate) struct DeliveryLoop {
    thread_handle: Option<JoinHandle<DeliveryOutcome>>,
    stop_signal: StopSignal,
    name: String,
}

impl DeliveryLoop {
    /// Spawn the delivery thread
    ///
    /// The handler is never called once `stop_signal` is set, even if
    /// events are still queued.
    pub fn start<S, F>(
        name: &str,
        mut rx: mpsc::Receiver<Delivery>,
        mut sink: S,
        mut on_frame: F,
        stop_signal: StopSignal,
    ) -> std::io::Result<Self>
    where
        S: FrameSink,
        F: FnMut(&FrameEvent, &mut S) + Send + 'static,
    {
        let thread_signal = stop_signal.clone();
        let thread_name = name.to_string();

        info!(name = %name, sink = sink.name(), "Starting delivery loop");

        let thread_handle = thread::Builder::new()
            .name(format!("{}-delivery", name))
            .spawn(move || {
                let mut delivered = 0u64;

                loop {
                    if thread_signal.is_stop_requested() {
                        debug!(name = %thread_name, "Stop signal received");
                        break;
                    }

                    match rx.try_recv() {
                        Ok(Delivery::Event(event)) => {
                            // Re-check: the stop may have landed while we waited
                            if thread_signal.is_stop_requested() {
                                break;
                            }
                            on_frame(&event, &mut sink);
                            delivered += 1;
                        }
                        Ok(Delivery::EndOfStream) => {
                            info!(name = %thread_name, delivered, "End of stream");
                            thread_signal.request_stop();
                            break;
                        }
                        Err(TryRecvError::Empty) => thread::sleep(timing::DELIVERY_IDLE_WAIT),
                        Err(TryRecvError::Disconnected) => {
                            debug!(name = %thread_name, "All producers gone");
                            thread_signal.request_stop();
                            break;
                        }
                    }
                }

                // Closing the queue makes further sends from the source fail fast
                rx.close();
                info!(name = %thread_name, delivered, "Delivery loop exiting");

                DeliveryOutcome {
                    sink: Box::new(sink),
                    delivered,
                }
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop and wait for it
    ///
    /// Returns `None` if the thread panicked; the sink is then already dropped.
    pub fn stop(&mut self) -> Option<DeliveryOutcome> {
        self.stop_signal.request_stop();
        let handle = self.thread_handle.take()?;
        debug!(name = %self.name, "Waiting for delivery thread to finish");
        match handle.join() {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(name = %self.name, "Delivery thread panicked: {:?}", e);
                None
            }
        }
    }
}

impl Drop for DeliveryLoop {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "DeliveryLoop dropped, stopping loop");
            if let Some(mut outcome) = self.stop() {
                outcome.sink.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::SinkResult;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct CountingSink {
        written: u64,
    }

    impl FrameSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn write(&mut self, _event: &FrameEvent) -> SinkResult<()> {
            self.written += 1;
            Ok(())
        }

        fn finish(&mut self) -> SinkResult<Option<PathBuf>> {
            Ok(None)
        }

        fn abort(&mut self) {}
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) {
        let start = Instant::now();
        while !done() && start.elapsed() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_events_delivered_in_order() {
        let (tx, rx) = mpsc::channel(4);
        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = Arc::clone(&seen);
        let signal = StopSignal::new();

        let mut delivery = DeliveryLoop::start(
            "test",
            rx,
            CountingSink::default(),
            move |event, sink: &mut CountingSink| {
                assert_eq!(event.sequence(), seen_clone.load(Ordering::SeqCst));
                seen_clone.fetch_add(1, Ordering::SeqCst);
                sink.write(event).unwrap();
            },
            signal.clone(),
        )
        .unwrap();

        for sequence in 0..3 {
            tx.blocking_send(Delivery::Event(FrameEvent::new(sequence, Vec::new())))
                .unwrap();
        }
        tx.blocking_send(Delivery::EndOfStream).unwrap();

        wait_until(Duration::from_secs(2), || !delivery.is_running());
        assert!(signal.is_stop_requested());

        let outcome = delivery.stop().unwrap();
        assert_eq!(outcome.delivered, 3);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_no_delivery_after_stop() {
        let (tx, rx) = mpsc::channel(8);
        let signal = StopSignal::new();
        let calls = Arc::new(AtomicU64::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut delivery = DeliveryLoop::start(
            "test",
            rx,
            CountingSink::default(),
            move |_, _: &mut CountingSink| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            signal,
        )
        .unwrap();

        let outcome = delivery.stop().unwrap();
        let before = calls.load(Ordering::SeqCst);
        assert_eq!(outcome.delivered, before);

        // Queue is closed once the loop exits
        assert!(tx.try_send(Delivery::Event(FrameEvent::default())).is_err());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    #[test]
    fn test_disconnected_producers_end_loop() {
        let (tx, rx) = mpsc::channel(1);
        let signal = StopSignal::new();
        let mut delivery = DeliveryLoop::start(
            "test",
            rx,
            CountingSink::default(),
            |_, _: &mut CountingSink| {},
            signal.clone(),
        )
        .unwrap();

        drop(tx);
        wait_until(Duration::from_secs(2), || !delivery.is_running());
        assert!(signal.is_stop_requested());
        assert!(delivery.stop().is_some());
    }
}
