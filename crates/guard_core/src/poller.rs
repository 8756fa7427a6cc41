use std::{sync::Arc, time::Duration};

use shared::domain::ConnectionStatus;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::debug;

use crate::{gateway::ServerGateway, orchestrator::GuardHandle};

/// Mirrors the server-side alarm flag into the orchestrator while the server
/// is reachable. Failed polls keep the last known state.
pub struct RemoteStatePoller {
    task: JoinHandle<()>,
}

impl RemoteStatePoller {
    pub fn spawn(gateway: Arc<dyn ServerGateway>, guard: GuardHandle, interval: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if guard.snapshot().connection != ConnectionStatus::Connected {
                    continue;
                }
                match gateway.get_remote_alarm_state().await {
                    Some(state) => {
                        if guard.publish_remote_state(state).await.is_err() {
                            debug!("orchestrator closed; stopping remote alarm poller");
                            break;
                        }
                    }
                    None => debug!("remote alarm poll failed; keeping last known state"),
                }
            }
        });
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for RemoteStatePoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
#[path = "tests/poller_tests.rs"]
mod tests;
