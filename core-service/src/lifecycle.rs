//! Background tasks owned by a running service

use crate::PolyglotService;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventStream};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) struct Lifecycle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Lifecycle {
    /// Subscribe first, then spawn, so no host event published after
    /// `start` returns is missed.
    pub(crate) fn start(service: PolyglotService, config: &CoreConfig) -> Self {
        let cancel = CancellationToken::new();
        let events = EventStream::new(service.event_bus().subscribe())
            .filter(|event| matches!(event, CoreEvent::Host(_)));

        let mut tasks = vec![tokio::spawn(event_loop(
            service.clone(),
            events,
            cancel.clone(),
            config.settings.reconcile_on_start,
        ))];

        if config.features.enable_periodic_cleanup {
            if let Some(period) = config.settings.orphan_sweep_interval {
                tasks.push(tokio::spawn(sweep_loop(service, period, cancel.clone())));
            }
        }

        Self { cancel, tasks }
    }

    /// Cancel, then wait; subscriptions drop with their tasks.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

async fn event_loop(
    service: PolyglotService,
    mut events: EventStream,
    cancel: CancellationToken,
    reconcile_on_start: bool,
) {
    if reconcile_on_start {
        if let Err(e) = service.reconcile_all_users(&cancel).await {
            warn!(error = %e, "Startup reconciliation failed");
        }
    }

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv() => received,
        };

        match received {
            Ok(CoreEvent::Host(event)) => {
                debug!(event = ?event, "Handling host event");
                if let Err(e) = service.handle_host_event(event, &cancel).await {
                    error!(error = %e, "Host event handling failed");
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event loop lagged, host events were lost; catching up");
                if let Err(e) = service.catch_up_host_events(&cancel).await {
                    error!(error = %e, "Catch-up after lag failed");
                }
            }
            Err(RecvError::Closed) => break,
        }
    }

    drop(events);
    info!("Host event loop stopped");
}

async fn sweep_loop(service: PolyglotService, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = service.run_orphan_cleanup(&cancel).await {
                    error!(error = %e, "Periodic orphan sweep failed");
                }
            }
        }
    }

    info!("Orphan sweep stopped");
}
