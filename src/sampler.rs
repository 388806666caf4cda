//! Wearable measurement loop
//!
//! Cycles `Sampling -> Resting -> Sampling ...` until stopped. Each sampling
//! phase opens a fresh window, registers with the sensor source, collects
//! readings until the window timer elapses, then closes the window and hands
//! any result to a detached transmission task so sending overlaps the rest.
//!
//! A failed sensor registration skips that cycle's sampling; the loop carries
//! on with the rest period. Stopping cancels any pending wait, discards the
//! open window, and unregisters from the source. Transmissions already in
//! flight run to completion.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::observer::{Observers, RelayEvent};
use crate::sensor::HeartRateSource;
use crate::transport::{self, DataChannel, DataItem};
use crate::types::{HrvDatagram, HrvResult};
use crate::window::MeasurementWindow;

/// Measurement loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerState {
    Idle,
    Sampling,
    Resting,
    Stopped,
}

enum WindowOutcome {
    Closed(Option<HrvResult>),
    /// Sensor registration failed, nothing was sampled
    Aborted,
    Stopped,
}

/// Periodic HRV sampler for the wearable role
pub struct Sampler {
    source: Arc<dyn HeartRateSource>,
    channel: Arc<dyn DataChannel>,
    window: Duration,
    rest: Duration,
    path: String,
    send_timeout: Duration,
    observers: Observers,
}

impl Sampler {
    pub fn new(
        source: Arc<dyn HeartRateSource>,
        channel: Arc<dyn DataChannel>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            source,
            channel,
            window: config.sampler.window(),
            rest: config.sampler.rest(),
            path: config.transport.path.clone(),
            send_timeout: config.transport.send_timeout(),
            observers: Observers::new(),
        }
    }

    /// Publish events to an existing observer registry
    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    /// Spawn the loop on the current runtime
    pub fn start(self) -> SamplerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SamplerState::Idle);

        log::info!(
            "Sampler started: {:?} window, {:?} rest",
            self.window,
            self.rest
        );
        let task = tokio::spawn(self.run(stop_rx, state_tx));

        SamplerHandle {
            stop_tx,
            state_rx,
            task,
        }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>, state_tx: watch::Sender<SamplerState>) {
        let mut cycle: u64 = 0;

        loop {
            if *stop_rx.borrow() {
                break;
            }
            cycle += 1;

            self.set_state(&state_tx, SamplerState::Sampling);
            match self.measure_once(cycle, &mut stop_rx).await {
                WindowOutcome::Stopped => break,
                WindowOutcome::Closed(Some(result)) => {
                    log::info!(
                        "HRV measured: RMSSD={:.0}ms, HR={} bpm, samples={}",
                        result.rmssd_ms,
                        result.avg_heart_rate_bpm,
                        result.sample_count
                    );
                    self.observers.notify(RelayEvent::Measured(result.clone()));
                    self.spawn_transmit(result);
                }
                WindowOutcome::Closed(None) | WindowOutcome::Aborted => {}
            }

            self.set_state(&state_tx, SamplerState::Resting);
            log::debug!("Resting for {:?}", self.rest);
            tokio::select! {
                _ = tokio::time::sleep(self.rest) => {}
                _ = stop_rx.changed() => break,
            }
        }

        self.set_state(&state_tx, SamplerState::Stopped);
        log::info!("Sampler stopped after {} cycle(s)", cycle);
    }

    async fn measure_once(&self, cycle: u64, stop_rx: &mut watch::Receiver<bool>) -> WindowOutcome {
        let mut readings = match self.source.register().await {
            Ok(rx) => rx,
            Err(e) => {
                log::warn!("Cycle {}: {}, sampling skipped", cycle, e);
                return WindowOutcome::Aborted;
            }
        };

        log::info!("Cycle {}: measuring for {:?}", cycle, self.window);
        let mut window = MeasurementWindow::open();
        let deadline = tokio::time::sleep(self.window);
        tokio::pin!(deadline);
        let mut feed_open = true;

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => {
                    self.source.unregister().await;
                    log::info!(
                        "Cycle {}: stopped mid-window, discarding {} samples",
                        cycle,
                        window.len()
                    );
                    return WindowOutcome::Stopped;
                }
                _ = &mut deadline => break,
                reading = readings.recv(), if feed_open => match reading {
                    Some(reading) => {
                        window.push(reading);
                    }
                    None => feed_open = false,
                },
            }
        }

        self.source.unregister().await;

        let sample_count = window.len();
        let result = window.close();
        if result.is_none() {
            self.observers.notify(RelayEvent::Skipped { sample_count });
        }
        WindowOutcome::Closed(result)
    }

    fn spawn_transmit(&self, result: HrvResult) {
        let channel = Arc::clone(&self.channel);
        let observers = self.observers.clone();
        let path = self.path.clone();
        let timeout = self.send_timeout;
        let datagram = HrvDatagram::captured_now(&result);

        tokio::spawn(async move {
            let item = match DataItem::encode(&path, &datagram) {
                Ok(item) => item,
                Err(e) => {
                    log::error!("Could not encode HRV datagram: {}", e);
                    return;
                }
            };
            let report = transport::transmit(channel.as_ref(), item, timeout).await;
            observers.notify(RelayEvent::Transmitted(report));
        });
    }

    fn set_state(&self, state_tx: &watch::Sender<SamplerState>, state: SamplerState) {
        state_tx.send_replace(state);
        self.observers.notify(RelayEvent::StateChanged(state));
    }
}

/// Control handle for a running sampler; dropping it stops the loop
pub struct SamplerHandle {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<SamplerState>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    pub fn state(&self) -> SamplerState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SamplerState> {
        self.state_rx.clone()
    }

    /// Signal stop and wait for the loop to exit; returns the final state
    pub async fn stop(self) -> SamplerState {
        self.stop_tx.send_replace(true);
        if let Err(e) = self.task.await {
            log::error!("Sampler task ended abnormally: {}", e);
        }
        let state = *self.state_rx.borrow();
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SimulatedSource;
    use crate::transport::{Inbound, SimDataLayer, HRV_DATA_PATH};
    use crate::window::SensorReading;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct Rig {
        source: Arc<SimulatedSource>,
        inbox: mpsc::Receiver<Inbound>,
        events: Arc<Mutex<Vec<RelayEvent>>>,
        handle: SamplerHandle,
    }

    fn start_rig(source: SimulatedSource) -> Rig {
        let layer = SimDataLayer::new();
        let watch_node = Arc::new(layer.create_node());
        let phone = layer.create_node();
        let inbox = phone.take_inbox().unwrap();

        let source = Arc::new(source);
        let events = Arc::new(Mutex::new(Vec::new()));
        let observers = Observers::new();
        let sink = Arc::clone(&events);
        observers.register(Arc::new(move |event: &RelayEvent| {
            sink.lock().unwrap().push(event.clone());
        }));

        let handle = Sampler::new(source.clone(), watch_node, &RelayConfig::default())
            .with_observers(observers)
            .start();

        Rig {
            source,
            inbox,
            events,
            handle,
        }
    }

    fn intervals(values: &[f64]) -> Vec<SensorReading> {
        values
            .iter()
            .map(|ms| SensorReading::with_interval(60_000.0 / ms, *ms))
            .collect()
    }

    fn states(events: &[RelayEvent]) -> Vec<SamplerState> {
        events
            .iter()
            .filter_map(|e| match e {
                RelayEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_transmits_result() {
        let source = SimulatedSource::new();
        source.push_cycle(intervals(&[1000.0, 900.0, 1100.0]));
        let mut rig = start_rig(source);
        let started = tokio::time::Instant::now();

        let (_, item) = rig.inbox.recv().await.unwrap();
        let datagram = item.as_hrv(HRV_DATA_PATH).unwrap().unwrap();
        assert!((datagram.rmssd - 158.113).abs() < 0.001);
        assert_eq!(datagram.avg_heart_rate, 60);
        assert!(started.elapsed() >= Duration::from_secs(60));

        assert_eq!(rig.handle.stop().await, SamplerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_window_rests_and_continues() {
        let mut rig = start_rig(SimulatedSource::new());

        tokio::time::sleep(Duration::from_secs(301)).await;

        assert_eq!(rig.source.registrations(), 2);
        assert!(rig.inbox.try_recv().is_err());
        assert_eq!(rig.handle.state(), SamplerState::Sampling);

        let events = rig.events.lock().unwrap().clone();
        assert!(events.contains(&RelayEvent::Skipped { sample_count: 0 }));
        assert_eq!(
            states(&events)[..3],
            [
                SamplerState::Sampling,
                SamplerState::Resting,
                SamplerState::Sampling
            ]
        );

        rig.handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_samples_skipped() {
        let source = SimulatedSource::new();
        source.push_cycle(intervals(&[800.0, 800.0]));
        let mut rig = start_rig(source);

        tokio::time::sleep(Duration::from_secs(90)).await;

        assert!(rig.inbox.try_recv().is_err());
        let events = rig.events.lock().unwrap().clone();
        assert!(events.contains(&RelayEvent::Skipped { sample_count: 2 }));
        assert!(!events.iter().any(|e| matches!(e, RelayEvent::Measured(_))));

        rig.handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_closes_on_timer() {
        let source = SimulatedSource::new();
        source.push_cycle(intervals(&[800.0; 100]));
        let mut rig = start_rig(source);

        let (_, item) = rig.inbox.recv().await.unwrap();
        assert!(item.as_hrv(HRV_DATA_PATH).unwrap().is_some());

        let events = rig.events.lock().unwrap().clone();
        let measured = events
            .iter()
            .find_map(|e| match e {
                RelayEvent::Measured(result) => Some(result.clone()),
                _ => None,
            })
            .unwrap();
        assert!(measured.sample_count < 100);
        assert!(measured.sample_count > 2);

        rig.handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_window_discards_samples() {
        let source = SimulatedSource::new();
        source.push_cycle(intervals(&[800.0; 100]));
        let mut rig = start_rig(source);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rig.source.is_registered());
        assert_eq!(rig.handle.stop().await, SamplerState::Stopped);

        tokio::time::sleep(Duration::from_secs(400)).await;
        assert!(rig.inbox.try_recv().is_err());
        assert!(!rig.source.is_registered());
        assert_eq!(rig.source.registrations(), 1);

        let events = rig.events.lock().unwrap().clone();
        assert!(!events.iter().any(|e| matches!(e, RelayEvent::Measured(_))));
        assert_eq!(states(&events).last(), Some(&SamplerState::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_resting() {
        let mut rig = start_rig(SimulatedSource::new());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(rig.handle.state(), SamplerState::Resting);

        let started = tokio::time::Instant::now();
        assert_eq!(rig.handle.stop().await, SamplerState::Stopped);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(rig.source.registrations(), 1);
        assert!(rig.inbox.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_failure_skips_one_cycle() {
        let source = SimulatedSource::new();
        source.push_registration_failure("sensor unavailable");
        source.push_cycle(intervals(&[1000.0, 900.0, 1100.0]));
        let mut rig = start_rig(source);
        let started = tokio::time::Instant::now();

        let (_, item) = rig.inbox.recv().await.unwrap();
        assert!(item.as_hrv(HRV_DATA_PATH).unwrap().is_some());
        // failed cycle rests 240s, next window closes 60s later
        assert!(started.elapsed() >= Duration::from_secs(300));

        rig.handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmission_reported_to_observers() {
        let source = SimulatedSource::new();
        source.push_cycle(intervals(&[1000.0, 900.0, 1100.0]));
        let mut rig = start_rig(source);

        rig.inbox.recv().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let events = rig.events.lock().unwrap().clone();
        let report = events
            .iter()
            .find_map(|e| match e {
                RelayEvent::Transmitted(report) => Some(report.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.path, "/hrv_data");

        rig.handle.stop().await;
    }
}
