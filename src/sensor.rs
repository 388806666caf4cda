//! Heart-rate sensor sources
//!
//! The sampler registers with a source at the start of every measurement
//! window and receives readings over a channel until it unregisters.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::RelayError;
use crate::window::SensorReading;

/// Source of heart-rate data points
#[async_trait]
pub trait HeartRateSource: Send + Sync {
    /// Start delivering readings; readings arrive in delivery order.
    async fn register(&self) -> Result<mpsc::Receiver<SensorReading>, RelayError>;

    /// Stop delivering readings.
    async fn unregister(&self);
}

/// What a simulated source does on one registration
#[derive(Debug, Clone)]
pub enum SimulatedCycle {
    Readings(Vec<SensorReading>),
    FailRegistration(String),
}

type ReadingGenerator = Box<dyn Fn(u32) -> Vec<SensorReading> + Send + Sync>;

/// In-process sensor that replays scripted readings, one script per registration.
///
/// Once the script queue is empty, the generator (if any) produces readings
/// for the cycle number; otherwise the cycle delivers nothing.
pub struct SimulatedSource {
    cycles: Mutex<VecDeque<SimulatedCycle>>,
    generator: Option<ReadingGenerator>,
    spacing: Duration,
    registrations: Mutex<u32>,
    feed: Mutex<Option<JoinHandle<()>>>,
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self {
            cycles: Mutex::new(VecDeque::new()),
            generator: None,
            spacing: Duration::from_secs(1),
            registrations: Mutex::new(0),
            feed: Mutex::new(None),
        }
    }

    /// Produce readings from a function of the cycle number once scripts run out
    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(u32) -> Vec<SensorReading> + Send + Sync + 'static,
    {
        self.generator = Some(Box::new(generator));
        self
    }

    /// Delay between consecutive readings
    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn push_cycle(&self, readings: Vec<SensorReading>) {
        if let Ok(mut cycles) = self.cycles.lock() {
            cycles.push_back(SimulatedCycle::Readings(readings));
        }
    }

    pub fn push_registration_failure(&self, reason: &str) {
        if let Ok(mut cycles) = self.cycles.lock() {
            cycles.push_back(SimulatedCycle::FailRegistration(reason.to_string()));
        }
    }

    /// Number of successful registrations so far
    pub fn registrations(&self) -> u32 {
        self.registrations.lock().map(|n| *n).unwrap_or(0)
    }

    /// Whether readings are currently being delivered
    pub fn is_registered(&self) -> bool {
        self.feed
            .lock()
            .map(|feed| feed.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    fn next_cycle(&self, cycle_number: u32) -> SimulatedCycle {
        let scripted = self.cycles.lock().ok().and_then(|mut c| c.pop_front());
        match (scripted, &self.generator) {
            (Some(cycle), _) => cycle,
            (None, Some(generator)) => SimulatedCycle::Readings(generator(cycle_number)),
            (None, None) => SimulatedCycle::Readings(Vec::new()),
        }
    }
}

#[async_trait]
impl HeartRateSource for SimulatedSource {
    async fn register(&self) -> Result<mpsc::Receiver<SensorReading>, RelayError> {
        let cycle_number = self.registrations();

        let readings = match self.next_cycle(cycle_number) {
            SimulatedCycle::Readings(readings) => readings,
            SimulatedCycle::FailRegistration(reason) => {
                return Err(RelayError::SensorRegistration(reason))
            }
        };

        if let Ok(mut n) = self.registrations.lock() {
            *n += 1;
        }

        let (tx, rx) = mpsc::channel(64);
        let spacing = self.spacing;
        let handle = tokio::spawn(async move {
            for reading in readings {
                tokio::time::sleep(spacing).await;
                if tx.send(reading).await.is_err() {
                    break;
                }
            }
        });

        if let Ok(mut feed) = self.feed.lock() {
            if let Some(previous) = feed.replace(handle) {
                previous.abort();
            }
        }

        Ok(rx)
    }

    async fn unregister(&self) {
        if let Ok(mut feed) = self.feed.lock() {
            if let Some(handle) = feed.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scripted_readings_in_order() {
        let source = SimulatedSource::new();
        source.push_cycle(vec![
            SensorReading::with_interval(60.0, 1000.0),
            SensorReading::with_interval(66.0, 900.0),
        ]);

        let mut rx = source.register().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().ibi_ms, Some(1000.0));
        assert_eq!(rx.recv().await.unwrap().ibi_ms, Some(900.0));
        assert!(rx.recv().await.is_none());
        assert_eq!(source.registrations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_failure() {
        let source = SimulatedSource::new();
        source.push_registration_failure("sensor busy");

        let err = source.register().await.unwrap_err();
        assert!(matches!(err, RelayError::SensorRegistration(_)));
        assert_eq!(source.registrations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_after_script() {
        let source = SimulatedSource::new()
            .with_generator(|cycle| vec![SensorReading::from_bpm(60.0 + cycle as f64)]);

        let mut rx = source.register().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().bpm, 60.0);
        let mut rx = source.register().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().bpm, 61.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_stops_feed() {
        let source = SimulatedSource::new().with_spacing(Duration::from_secs(10));
        source.push_cycle(vec![SensorReading::from_bpm(70.0); 5]);

        let mut rx = source.register().await.unwrap();
        assert!(source.is_registered());
        source.unregister().await;
        assert!(rx.recv().await.is_none());
        assert!(!source.is_registered());
    }
}
