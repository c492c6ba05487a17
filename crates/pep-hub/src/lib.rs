//! The Real-Time Delivery Hub — spec.md §4.5.
//!
//! Single-process pub/sub, isolated per tenant: one `broadcast` channel per
//! `tenant_id`, capacity 64. Grounded on `mqk-daemon::state::{AppState,
//! BusMsg, spawn_heartbeat}` and `mqk-daemon::routes::{stream,
//! broadcast_to_sse}` — the registry is the teacher's single-`Mutex`
//! `AppState.bus` generalized from one global channel to one per tenant, and
//! the SSE adapter is the teacher's `broadcast_to_sse`, extended to turn a
//! lagged receiver into a `lag` frame instead of silently dropping it.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use pep_schemas::{HospitalId, OccurrenceId, TenantId};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

/// Per-subscriber buffer depth — spec.md §4.5 ("size 64").
const SUBSCRIBER_BUFFER: usize = 64;

/// 15 s heartbeat ticker — spec.md §4.5.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Graceful-shutdown drain deadline — spec.md §9 design note / SPEC_FULL §4.5.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

/// One event on the hub — spec.md §4.5's event shape, carried as the SSE
/// payload. `Lag`/`Shutdown` are hub-internal frames with no DB counterpart.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    #[serde(rename = "occurrence.created")]
    Created {
        tenant_id: TenantId,
        occurrence_id: OccurrenceId,
        hospital_id: HospitalId,
        status: String,
        expires_at: DateTime<Utc>,
        produced_at: DateTime<Utc>,
    },
    #[serde(rename = "occurrence.status_changed")]
    StatusChanged {
        tenant_id: TenantId,
        occurrence_id: OccurrenceId,
        hospital_id: HospitalId,
        status: String,
        expires_at: DateTime<Utc>,
        reaction_latency_ms: Option<i64>,
        produced_at: DateTime<Utc>,
    },
    Heartbeat {
        produced_at: DateTime<Utc>,
    },
    Lag {
        skipped: u64,
        produced_at: DateTime<Utc>,
    },
    Shutdown,
}

impl HubEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            HubEvent::Created { .. } => "occurrence.created",
            HubEvent::StatusChanged { .. } => "occurrence.status_changed",
            HubEvent::Heartbeat { .. } => "heartbeat",
            HubEvent::Lag { .. } => "lag",
            HubEvent::Shutdown => "shutdown",
        }
    }
}

struct TenantChannel {
    tx: broadcast::Sender<HubEvent>,
    heartbeat: tokio::task::JoinHandle<()>,
}

impl Drop for TenantChannel {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

/// The registry: one lazily-created channel per tenant, guarded by a single
/// mutex on create/lookup — spec.md §5 ("Hub registry — guarded by a single
/// mutex on subscribe/unsubscribe; per-subscriber channels do not share
/// locks"). Cheap to clone; wrap in `Arc` once at server startup.
#[derive(Clone)]
pub struct Hub {
    channels: Arc<Mutex<HashMap<TenantId, TenantChannel>>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn sender_for(&self, tenant_id: TenantId) -> broadcast::Sender<HubEvent> {
        let mut channels = self.channels.lock().await;
        if let Some(chan) = channels.get(&tenant_id) {
            return chan.tx.clone();
        }
        let (tx, _rx) = broadcast::channel(SUBSCRIBER_BUFFER);
        let heartbeat = spawn_heartbeat(tx.clone());
        let sender = tx.clone();
        channels.insert(tenant_id, TenantChannel { tx, heartbeat });
        sender
    }

    /// Publish an event to every subscriber of `tenant_id`. A tenant with no
    /// current subscribers still gets (and keeps) a channel — publishing is
    /// what creates it, matching `mqk-daemon`'s "bus exists before any
    /// subscriber connects" lifecycle.
    pub async fn publish(&self, tenant_id: TenantId, event: HubEvent) {
        let tx = self.sender_for(tenant_id).await;
        let _ = tx.send(event);
    }

    /// Register a new subscriber for `tenant_id`. `role_filter` is accepted
    /// for callers that only want a subset of events visible to their role;
    /// spec.md's event shape carries no role field today, so the filter is
    /// currently a no-op pass-through reserved for that extension.
    pub async fn subscribe(
        &self,
        tenant_id: TenantId,
        _role_filter: Option<String>,
    ) -> broadcast::Receiver<HubEvent> {
        self.sender_for(tenant_id).await.subscribe()
    }

    /// Broadcast a terminal `Shutdown` frame to every tenant channel and give
    /// subscribers `SHUTDOWN_DRAIN` to observe it before the process exits —
    /// spec.md §4.5 ("Graceful shutdown broadcasts a terminal marker and
    /// drains with a 2 s deadline").
    pub async fn shutdown(&self) {
        {
            let channels = self.channels.lock().await;
            for chan in channels.values() {
                let _ = chan.tx.send(HubEvent::Shutdown);
            }
        }
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
    }

    #[cfg(test)]
    pub async fn tenant_count(&self) -> usize {
        self.channels.lock().await.len()
    }
}

fn spawn_heartbeat(tx: broadcast::Sender<HubEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            let _ = tx.send(HubEvent::Heartbeat {
                produced_at: Utc::now(),
            });
        }
    })
}

/// Adapt a tenant's broadcast receiver into an SSE event stream. A lagged
/// receiver (`BroadcastStreamRecvError::Lagged(n)`) becomes a `HubEvent::Lag`
/// frame rather than ending the stream — the teacher's `broadcast_to_sse`
/// drops `Err(_)` silently; spec.md §4.5's "connection not closed" contract
/// requires surfacing it instead.
fn map_lagged(msg: Result<HubEvent, BroadcastStreamRecvError>) -> HubEvent {
    match msg {
        Ok(event) => event,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => HubEvent::Lag {
            skipped,
            produced_at: Utc::now(),
        },
    }
}

pub fn broadcast_to_sse(
    rx: broadcast::Receiver<HubEvent>,
) -> impl Stream<Item = Result<axum::response::sse::Event, Infallible>> {
    BroadcastStream::new(rx).map(map_lagged).map(|event| {
        let name = event.event_name();
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(axum::response::sse::Event::default().event(name).data(data))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn publish_before_any_subscriber_still_creates_the_channel() {
        let hub = Hub::new();
        let tenant = Uuid::new_v4();
        hub.publish(
            tenant,
            HubEvent::Heartbeat {
                produced_at: Utc::now(),
            },
        )
        .await;
        assert_eq!(hub.tenant_count().await, 1);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let hub = Hub::new();
        let tenant = Uuid::new_v4();
        let mut rx = hub.subscribe(tenant, None).await;

        let occurrence_id = Uuid::new_v4();
        hub.publish(
            tenant,
            HubEvent::Created {
                tenant_id: tenant,
                occurrence_id,
                hospital_id: Uuid::new_v4(),
                status: "PENDING".to_string(),
                expires_at: Utc::now(),
                produced_at: Utc::now(),
            },
        )
        .await;

        let received = rx.recv().await.unwrap();
        match received {
            HubEvent::Created {
                occurrence_id: got, ..
            } => assert_eq!(got, occurrence_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn distinct_tenants_do_not_see_each_others_events() {
        let hub = Hub::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = hub.subscribe(a, None).await;
        let mut rx_b = hub.subscribe(b, None).await;

        hub.publish(
            a,
            HubEvent::Heartbeat {
                produced_at: Utc::now(),
            },
        )
        .await;

        rx_a.recv().await.unwrap();
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn overflowing_the_buffer_surfaces_as_lag_not_a_closed_stream() {
        let hub = Hub::new();
        let tenant = Uuid::new_v4();
        let rx = hub.subscribe(tenant, None).await;

        for _ in 0..(SUBSCRIBER_BUFFER + 10) {
            hub.publish(
                tenant,
                HubEvent::Heartbeat {
                    produced_at: Utc::now(),
                },
            )
            .await;
        }

        let mut stream = Box::pin(BroadcastStream::new(rx).map(map_lagged));
        let first = stream.next().await.unwrap();
        assert!(matches!(first, HubEvent::Lag { .. }));
        // and the stream keeps going rather than terminating on the lag
        assert!(stream.next().await.is_some());
    }

    #[tokio::test]
    async fn shutdown_broadcasts_a_terminal_frame() {
        let hub = Hub::new();
        let tenant = Uuid::new_v4();
        let mut rx = hub.subscribe(tenant, None).await;

        hub.shutdown().await;

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, HubEvent::Shutdown));
    }
}
