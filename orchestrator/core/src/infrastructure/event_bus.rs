// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Carries assistant turn events and the cortex learning events on one channel
// so a single subscriber (CLI, log sink, test) sees the whole turn.
//
// In-memory only: events are lost on restart and nobody listening is fine.

use crate::domain::events::TurnEvent;
use crate::domain::turn::TurnId;
use anvil_cortex::domain::CortexEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", content = "payload", rename_all = "snake_case")]
pub enum DomainEvent {
    Turn(TurnEvent),
    Cortex(CortexEvent),
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::Turn(event) => event.event_type(),
            DomainEvent::Cortex(event) => event.event_type(),
        }
    }
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_turn_event(&self, event: TurnEvent) {
        self.publish_event(DomainEvent::Turn(event));
    }

    pub fn publish_cortex_event(&self, event: CortexEvent) {
        self.publish_event(DomainEvent::Cortex(event));
    }

    fn publish_event(&self, event: DomainEvent) {
        debug!(event_type = event.event_type(), "Publishing event");

        // send() only fails when there are no receivers
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the turn events of a single turn
    pub fn subscribe_turn(&self, turn_id: TurnId) -> TurnEventReceiver {
        TurnEventReceiver {
            receiver: self.sender.subscribe(),
            turn_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// The cortex publishes through its own trait; route it onto the shared channel.
#[async_trait]
impl anvil_cortex::application::EventBus for EventBus {
    async fn publish(&self, event: CortexEvent) -> anyhow::Result<()> {
        self.publish_cortex_event(event);
        Ok(())
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for one turn's events (filtered)
pub struct TurnEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    turn_id: TurnId,
}

impl TurnEventReceiver {
    /// Receive the next turn event for the subscribed turn.
    /// Cortex events and other turns are skipped.
    pub async fn recv(&mut self) -> Result<TurnEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Turn(turn_event) = event {
                if turn_event.turn_id() == self.turn_id {
                    return Ok(turn_event);
                }
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::routing::Tier;
    use anvil_cortex::application::EventBus as CortexEventBus;
    use anvil_cortex::domain::{RuleId, SessionId};
    use chrono::Utc;

    fn routed(turn_id: TurnId) -> TurnEvent {
        TurnEvent::Routed {
            turn_id,
            session: SessionId::new(),
            tier: Tier::Balanced,
            modules: vec!["motor".to_string()],
            forced: false,
            routed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let turn_id = TurnId::new();
        event_bus.publish_turn_event(routed(turn_id));

        match receiver.recv().await.unwrap() {
            DomainEvent::Turn(TurnEvent::Routed { turn_id: id, .. }) => assert_eq!(id, turn_id),
            other => panic!("Wrong event type received: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cortex_events_share_the_channel() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let ids = vec![RuleId::new()];
        CortexEventBus::publish(
            &event_bus,
            CortexEvent::RuleUsageRecorded {
                rule_ids: ids.clone(),
                timestamp: Utc::now(),
            },
        )
        .await
        .unwrap();

        match receiver.recv().await.unwrap() {
            DomainEvent::Cortex(CortexEvent::RuleUsageRecorded { rule_ids, .. }) => {
                assert_eq!(rule_ids, ids)
            }
            other => panic!("Wrong event type received: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_turn_event_filtering() {
        let event_bus = EventBus::new(10);
        let turn_id = TurnId::new();
        let mut receiver = event_bus.subscribe_turn(turn_id);

        event_bus.publish_turn_event(routed(TurnId::new()));
        event_bus.publish_cortex_event(CortexEvent::RuleReinforced {
            rule_ids: vec![],
            timestamp: Utc::now(),
        });
        event_bus.publish_turn_event(routed(turn_id));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.turn_id(), turn_id);
    }

    #[test]
    fn test_publishing_without_subscribers_is_fine() {
        let event_bus = EventBus::default();
        assert_eq!(event_bus.subscriber_count(), 0);
        event_bus.publish_turn_event(routed(TurnId::new()));

        let mut late = event_bus.subscribe();
        assert!(matches!(late.try_recv(), Err(EventBusError::Empty)));
    }
}
