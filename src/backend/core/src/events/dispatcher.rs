//! Event dispatch into subscribed plugins.
//!
//! Subscriptions are recorded when a plugin is registered (from its
//! `plugin_service_get_subscribed_events` export) and dropped on unload.
//! Within one dispatch, subscribers are invoked in registration order; each
//! call is bounded by the configured per-call timeout so one slow plugin
//! cannot stall the dispatcher. Guest calls contend on the per-plugin lock
//! inside the runtime, so a plugin observes its events sequentially.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::plugins::PluginManager;

use super::{Event, EventKind};

// ═══════════════════════════════════════════════════════════════════════════════
// Subscription registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Event kind -> ordered subscriber (compact plugin id) lists.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: RwLock<HashMap<EventKind, Vec<String>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a plugin to the given kinds, preserving registration order.
    pub fn register(&self, compact_id: &str, kinds: &[EventKind]) {
        let mut subscriptions = self.subscriptions.write();
        for kind in kinds {
            let subscribers = subscriptions.entry(*kind).or_default();
            if !subscribers.iter().any(|id| id == compact_id) {
                subscribers.push(compact_id.to_string());
            }
        }
    }

    /// Drop a plugin from every kind.
    pub fn unregister(&self, compact_id: &str) {
        let mut subscriptions = self.subscriptions.write();
        for subscribers in subscriptions.values_mut() {
            subscribers.retain(|id| id != compact_id);
        }
    }

    pub fn subscribers(&self, kind: EventKind) -> Vec<String> {
        self.subscriptions
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dispatch outcome
// ═══════════════════════════════════════════════════════════════════════════════

/// Aggregate result of dispatching a cancellable event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Proceed,
    Cancelled { plugin: String, message: String },
}

impl DispatchOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dispatcher
// ═══════════════════════════════════════════════════════════════════════════════

pub struct EventDispatcher {
    subscriptions: Arc<SubscriptionRegistry>,
    manager: Arc<PluginManager>,
    call_timeout: Duration,
}

impl EventDispatcher {
    pub fn new(
        subscriptions: Arc<SubscriptionRegistry>,
        manager: Arc<PluginManager>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            subscriptions,
            manager,
            call_timeout,
        }
    }

    /// Deliver an event to every subscriber.
    ///
    /// For pre-events the outcome turns `Cancelled` as soon as a subscriber
    /// votes to cancel and stays there; remaining subscribers are still
    /// notified. Post-event cancel votes are ignored. Handler errors and
    /// timeouts are logged and never cancel an operation by themselves.
    pub async fn dispatch(&self, event: &Event) -> DispatchOutcome {
        let subscribers = self.subscriptions.subscribers(event.kind);
        if subscribers.is_empty() {
            return DispatchOutcome::Proceed;
        }

        let envelope = event.to_wire();
        let mut outcome = DispatchOutcome::Proceed;

        for compact_id in subscribers {
            let Some(plugin) = self.manager.get(&compact_id).await else {
                debug!(plugin = %compact_id, kind = %event.kind, "Subscriber no longer loaded");
                continue;
            };
            if !plugin.is_enabled() {
                continue;
            }

            let call = plugin.handle_event(&envelope);
            match tokio::time::timeout(self.call_timeout, call).await {
                Err(_) => {
                    warn!(plugin = %compact_id, kind = %event.kind, "Event handler timed out");
                }
                Ok(Err(e)) => {
                    warn!(plugin = %compact_id, kind = %event.kind, error = %e, "Event handler failed");
                }
                Ok(Ok(result)) => {
                    if event.kind.is_cancellable()
                        && result.handled
                        && result.should_cancel
                        && !outcome.is_cancelled()
                    {
                        debug!(
                            plugin = %compact_id,
                            kind = %event.kind,
                            message = %result.message,
                            "Subscriber cancelled operation"
                        );
                        outcome = DispatchOutcome::Cancelled {
                            plugin: compact_id.clone(),
                            message: result.message,
                        };
                    }
                }
            }
        }

        if event.kind.is_cancellable() {
            outcome
        } else {
            DispatchOutcome::Proceed
        }
    }
}
