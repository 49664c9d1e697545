// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Gateway composition root.
//!
//! Builds every component explicitly from a [`Config`] and an adapter store,
//! runs the idle sweeper and the backend event loop, and owns the shutdown
//! path that releases every backend handle.

use crate::config::Config;
use crate::gateway_core::errors::GatewayError;
use crate::gateway_core::events::GatewayEvent;
use crate::gateway_core::traits::AdapterStore;
use crate::mcp::backend::Backends;
use crate::mcp::remote::RemoteBridge;
use crate::mcp::router::MessageRouter;
use crate::mcp::stdio::StdioBridge;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Gateway {
    config: Config,
    adapters: Arc<dyn AdapterStore>,
    router: Arc<MessageRouter>,
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started_at: DateTime<Utc>,
}

impl Gateway {
    pub fn new(config: &Config, adapters: Arc<dyn AdapterStore>) -> Result<Arc<Self>, GatewayError> {
        config.validate()?;
        let remote = RemoteBridge::new(config.dispatch_timeout(), config.service_url_template.clone())?;
        let backends = Backends::new(StdioBridge::new(), remote);
        let router = Arc::new(MessageRouter::new(
            adapters.clone(),
            backends,
            config.router_settings(),
        ));
        Ok(Arc::new(Self {
            config: config.clone(),
            adapters,
            router,
            stop: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started_at: Utc::now(),
        }))
    }

    /// Start the background tasks. Must run inside a tokio runtime.
    pub fn start(&self) {
        let sweeper = tokio::spawn(run_sweeper(
            self.router.clone(),
            self.stop.clone(),
            self.config.sweep_interval(),
            self.config.session_idle_after(),
            self.config.session_idle_timeout(),
        ));
        let events = tokio::spawn(run_event_loop(
            self.router.clone(),
            self.router.subscribe(),
            self.stop.clone(),
        ));
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend([sweeper, events]);
        info!(
            sweep_interval_secs = self.config.sweep_interval_secs,
            idle_timeout_secs = self.config.session_idle_timeout_secs,
            "Gateway started"
        );
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn adapters(&self) -> &Arc<dyn AdapterStore> {
        &self.adapters
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Lifecycle hook for collaborators: session, capability and process events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.router.subscribe()
    }

    /// Terminate every session and kill every backend process. Idempotent.
    pub fn shutdown(&self) {
        if self.stop.is_cancelled() {
            return;
        }
        self.stop.cancel();
        let sessions = self.router.terminate_all("gateway shutting down");
        self.router.backends().stdio().shutdown_all();
        for task in self.tasks.lock().unwrap_or_else(|p| p.into_inner()).drain(..) {
            task.abort();
        }
        info!(sessions, "Gateway stopped");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_sweeper(
    router: Arc<MessageRouter>,
    stop: CancellationToken,
    every: Duration,
    idle_after: Duration,
    max_idle: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let expired = router.sweep_idle(idle_after, max_idle);
                if expired > 0 {
                    info!(expired, "Reclaimed idle sessions");
                }
            }
        }
    }
}

async fn run_event_loop(
    router: Arc<MessageRouter>,
    mut events: broadcast::Receiver<GatewayEvent>,
    stop: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => break,
            event = events.recv() => event,
        };
        match next {
            Ok(event) => {
                debug!(?event, "Gateway event");
                router.on_event(&event);
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Gateway event loop lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryAdapterStore;

    #[tokio::test]
    async fn test_start_and_shutdown_idempotent() {
        let gateway = Gateway::new(&Config::default(), Arc::new(InMemoryAdapterStore::new())).unwrap();
        gateway.start();
        let mut events = gateway.subscribe();
        gateway.shutdown();
        gateway.shutdown();
        assert!(gateway.router().sessions().is_empty());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = Config {
            cache_max_entries: 0,
            ..Config::default()
        };
        assert!(Gateway::new(&config, Arc::new(InMemoryAdapterStore::new())).is_err());
    }
}
