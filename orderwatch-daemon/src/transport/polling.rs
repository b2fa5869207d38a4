//! Timer-driven transport: fetch immediately on `start`, then every
//! `interval`. Failures never cancel the schedule; the next tick simply
//! tries again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{fetch_once, BatchSink, FetchOrigin, OrderSource, Transport};

pub struct PollingTransport<T> {
    source: Arc<dyn OrderSource<T>>,
    interval: Duration,
    timeout: Duration,
    sink: Option<BatchSink<T>>,
    schedule: Option<JoinHandle<()>>,
    out_of_band: Vec<JoinHandle<()>>,
}

impl<T> PollingTransport<T> {
    pub fn new(source: Arc<dyn OrderSource<T>>, interval: Duration, timeout: Duration) -> Self {
        Self {
            source,
            interval,
            timeout,
            sink: None,
            schedule: None,
            out_of_band: Vec::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.schedule.is_some()
    }
}

impl<T: Send + 'static> Transport<T> for PollingTransport<T> {
    fn start(&mut self, sink: BatchSink<T>) {
        if self.schedule.is_some() {
            tracing::debug!("polling transport already running");
            return;
        }

        let source = Arc::clone(&self.source);
        let interval = self.interval;
        let timeout = self.timeout;
        let task_sink = sink.clone();
        self.schedule = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // A slow fetch pushes the next tick back instead of bunching ticks.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut origin = FetchOrigin::Initial;
            loop {
                ticker.tick().await;
                if task_sink.is_closed() {
                    break;
                }
                fetch_once(source.as_ref(), &task_sink, origin, timeout).await;
                origin = FetchOrigin::Scheduled;
            }
        }));
        self.sink = Some(sink);
        tracing::debug!(interval_ms = interval.as_millis() as u64, "polling started");
    }

    fn stop(&mut self) {
        let Some(schedule) = self.schedule.take() else {
            return;
        };
        schedule.abort();
        for task in self.out_of_band.drain(..) {
            task.abort();
        }
        self.sink = None;
        tracing::debug!("polling stopped");
    }

    fn refresh_now(&mut self, origin: FetchOrigin) {
        let Some(sink) = self.sink.clone() else {
            tracing::debug!(origin = ?origin, "refresh ignored; polling not running");
            return;
        };
        self.out_of_band.retain(|task| !task.is_finished());

        let source = Arc::clone(&self.source);
        let timeout = self.timeout;
        self.out_of_band.push(tokio::spawn(async move {
            fetch_once(source.as_ref(), &sink, origin, timeout).await;
        }));
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}

impl<T> Drop for PollingTransport<T> {
    fn drop(&mut self) {
        if let Some(schedule) = self.schedule.take() {
            schedule.abort();
        }
        for task in self.out_of_band.drain(..) {
            task.abort();
        }
    }
}
