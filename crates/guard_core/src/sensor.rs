use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use shared::domain::ProximityReading;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

#[async_trait]
pub trait ProximityDriver: Send + Sync {
    async fn is_available(&self) -> bool;
    /// Opens a push stream of readings. Dropping the stream releases the
    /// hardware listener.
    async fn open_stream(&self) -> Result<BoxStream<'static, ProximityReading>>;
}

pub struct MissingProximityDriver;

#[async_trait]
impl ProximityDriver for MissingProximityDriver {
    async fn is_available(&self) -> bool {
        false
    }

    async fn open_stream(&self) -> Result<BoxStream<'static, ProximityReading>> {
        Err(anyhow!("proximity sensor is not available on this platform"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct ActiveSubscription {
    handle: SubscriptionHandle,
    task: JoinHandle<()>,
}

pub struct SensorAdapter {
    driver: Arc<dyn ProximityDriver>,
    next_handle: AtomicU64,
    active: Mutex<Option<ActiveSubscription>>,
}

impl SensorAdapter {
    pub fn new(driver: Arc<dyn ProximityDriver>) -> Self {
        Self {
            driver,
            next_handle: AtomicU64::new(1),
            active: Mutex::new(None),
        }
    }

    pub async fn is_available(&self) -> bool {
        self.driver.is_available().await
    }

    /// Replaces any prior subscription. `None` when the sensor is absent or
    /// the stream cannot be opened.
    pub async fn subscribe<F>(&self, on_reading: F) -> Option<SubscriptionHandle>
    where
        F: Fn(ProximityReading) + Send + Sync + 'static,
    {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            debug!(handle = previous.handle.0, "replacing proximity subscription");
            previous.task.abort();
        }

        if !self.driver.is_available().await {
            debug!("proximity sensor unavailable; subscribe is a no-op");
            return None;
        }

        let mut stream = match self.driver.open_stream().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to subscribe to proximity sensor");
                return None;
            }
        };

        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let task = tokio::spawn(async move {
            while let Some(reading) = stream.next().await {
                on_reading(reading);
            }
            debug!(handle = handle.0, "proximity stream ended");
        });
        info!(handle = handle.0, "proximity sensor subscribed");
        *active = Some(ActiveSubscription { handle, task });
        Some(handle)
    }

    /// Stale handles are ignored so a late unsubscribe cannot tear down a
    /// newer subscription.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|current| current.handle == handle) {
            if let Some(current) = active.take() {
                current.task.abort();
                info!(handle = handle.0, "proximity sensor unsubscribed");
            }
        }
    }

    pub async fn is_subscribed(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|current| !current.task.is_finished())
    }
}

impl Drop for SensorAdapter {
    fn drop(&mut self) {
        if let Some(current) = self.active.get_mut().take() {
            current.task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/sensor_tests.rs"]
mod tests;
