//! Event routing: self-origin filter, policy, endpoint resolution,
//! formatting, then hand-off to the dispatcher.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    hubrelay_channels::{
        AccessDenied, AccessRequest, Delivery, InboundEvent, RoutingEndpoint, ThreadMode,
        check_access,
    },
    hubrelay_config::ThreadsConfig,
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::{
    delivery::{LOG_PREVIEW_CHARS, preview},
    dispatch::DeliveryDispatcher,
    format::{format_event, format_mention},
    registry::{OrgRegistry, OrgSpec},
    threads::{BufferedMessage, ThreadContext, ThreadOutcome, mentions_agent},
};

/// Characters of an unknown frame's payload kept in logs.
const UNKNOWN_PAYLOAD_PREVIEW_CHARS: usize = 200;

/// An event tagged with the org session it arrived on.
#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub org: Arc<str>,
    pub event: InboundEvent,
}

/// What the router decided to do with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Deliver(Delivery),
    /// Sent by the agent itself.
    SelfOrigin,
    Denied(AccessDenied),
    /// Held as thread context until the agent is mentioned.
    Buffered,
    /// Logged only: presence, unknown frames, empty content.
    Ignored,
    UnknownOrg,
}

pub struct EventRouter {
    orgs: HashMap<String, Arc<OrgSpec>>,
    /// Whether endpoints carry the `org:<label>|` prefix. Starts from the
    /// configured org count and is narrowed to the connected set once
    /// startup settles.
    multi_org: Arc<AtomicBool>,
    threads: ThreadContext,
}

impl EventRouter {
    pub fn new(registry: &OrgRegistry, threads: &ThreadsConfig) -> Self {
        Self {
            orgs: registry
                .orgs()
                .iter()
                .map(|spec| (spec.label.clone(), Arc::clone(spec)))
                .collect(),
            multi_org: Arc::new(AtomicBool::new(registry.is_multi_org())),
            threads: ThreadContext::new(threads.buffer_limit, threads.max_threads),
        }
    }

    /// Shared switch for the org prefix.
    pub fn multi_org_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.multi_org)
    }

    /// Decide what to do with one event. Pure apart from thread buffering.
    pub fn route(&mut self, routed: &RoutedEvent) -> RouteDecision {
        let Some(spec) = self.orgs.get(&*routed.org).cloned() else {
            debug!(org = %routed.org, "event for unknown org");
            return RouteDecision::UnknownOrg;
        };
        let event = &routed.event;
        let label = &spec.label;

        if is_self_origin(&spec, event) {
            debug!(org = %label, kind = event.kind(), "ignoring own event");
            return RouteDecision::SelfOrigin;
        }

        let request = match event {
            InboundEvent::DirectMessage { sender, .. } => AccessRequest::Direct { sender },
            InboundEvent::GroupMessage {
                group_id, sender, ..
            } => AccessRequest::Group {
                group_id,
                sender: Some(sender),
            },
            InboundEvent::ThreadMessage {
                thread_id, sender, ..
            } => AccessRequest::Group {
                group_id: thread_id,
                sender: Some(sender),
            },
            InboundEvent::ThreadLifecycle { thread_id, .. } => AccessRequest::Group {
                group_id: thread_id,
                sender: None,
            },
            InboundEvent::PresenceChange {
                entity_id,
                name,
                online,
            } => {
                info!(
                    org = %label,
                    agent = %name.as_deref().unwrap_or(entity_id),
                    online,
                    "presence changed"
                );
                return RouteDecision::Ignored;
            },
            InboundEvent::Unknown {
                raw_type,
                raw_payload,
            } => {
                info!(
                    org = %label,
                    kind = %raw_type,
                    payload = %preview(&raw_payload.to_string(), UNKNOWN_PAYLOAD_PREVIEW_CHARS),
                    "unhandled event"
                );
                return RouteDecision::Ignored;
            },
        };

        if let Err(reason) = check_access(&spec.policy, request) {
            warn!(org = %label, kind = event.kind(), reason = %reason, "event denied by policy");
            return RouteDecision::Denied(reason);
        }

        let multi_org = self.multi_org.load(Ordering::Relaxed);
        let prefix = multi_org.then_some(label.as_str());
        let content = match event {
            InboundEvent::ThreadMessage {
                thread_id,
                sender,
                sender_id: _,
                content,
            } if spec.policy.thread_mode == ThreadMode::Mention => {
                if content.is_empty() {
                    return RouteDecision::Ignored;
                }
                let mentioned = mentions_agent(content, &spec.agent_name, spec.agent_id.as_deref());
                let message = BufferedMessage {
                    sender: sender.clone(),
                    content: content.clone(),
                };
                match self.threads.observe(label, thread_id, message, mentioned) {
                    ThreadOutcome::Buffered => {
                        debug!(org = %label, thread = %thread_id, "buffered thread message");
                        return RouteDecision::Buffered;
                    },
                    ThreadOutcome::Mentioned { context } => {
                        format_mention(thread_id, sender, content, &context, prefix)
                    },
                }
            },
            _ => match format_event(event, prefix) {
                Some(content) => content,
                None => {
                    debug!(org = %label, kind = event.kind(), "nothing to deliver");
                    return RouteDecision::Ignored;
                },
            },
        };

        let Some(endpoint) = endpoint_for(event) else {
            warn!(
                org = %label,
                kind = event.kind(),
                sender = event.origin_name().unwrap_or_default(),
                "sender name is not a usable endpoint"
            );
            return RouteDecision::Ignored;
        };
        let endpoint = if multi_org {
            endpoint.with_org(label.as_str())
        } else {
            endpoint
        };

        info!(
            org = %label,
            kind = event.kind(),
            endpoint = %endpoint,
            content = %preview(&content, LOG_PREVIEW_CHARS),
            "inbound event accepted"
        );
        RouteDecision::Deliver(Delivery {
            label: label.clone(),
            endpoint: endpoint.to_string(),
            content,
        })
    }

    /// Consume events until every session has hung up, dispatching accepted
    /// ones. Buffered thread context is discarded on exit.
    pub async fn run(mut self, mut events: mpsc::Receiver<RoutedEvent>, dispatcher: DeliveryDispatcher) {
        while let Some(routed) = events.recv().await {
            if let RouteDecision::Deliver(delivery) = self.route(&routed) {
                dispatcher.dispatch(delivery);
            }
        }
        let dropped = self.threads.clear();
        if dropped > 0 {
            info!(dropped, "discarded buffered thread context");
        }
        debug!("router stopped");
    }
}

/// Whether the event was caused by the agent itself.
///
/// Compares hub ids when the agent id is known. Without it the display name
/// is compared, which misfires if another participant shares the name.
pub fn is_self_origin(spec: &OrgSpec, event: &InboundEvent) -> bool {
    match spec.agent_id.as_deref() {
        Some(own_id) => event.origin_id() == Some(own_id),
        None => event.origin_name() == Some(spec.agent_name.as_str()),
    }
}

/// Unprefixed endpoint an event is delivered to. `None` for presence and
/// unknown events, and for DM senders whose name would read back as a
/// different endpoint.
pub fn endpoint_for(event: &InboundEvent) -> Option<RoutingEndpoint> {
    match event {
        InboundEvent::DirectMessage { sender, .. } => RoutingEndpoint::try_direct(sender.as_str()).ok(),
        InboundEvent::GroupMessage { group_id, .. } => Some(RoutingEndpoint::channel(group_id.as_str())),
        InboundEvent::ThreadMessage { thread_id, .. }
        | InboundEvent::ThreadLifecycle { thread_id, .. } => {
            Some(RoutingEndpoint::thread(thread_id.as_str()))
        },
        InboundEvent::PresenceChange { .. } | InboundEvent::Unknown { .. } => None,
    }
}
