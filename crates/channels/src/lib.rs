//! Shared vocabulary for the hub relay.
//!
//! Access policy evaluation, the normalized inbound event model, routing
//! endpoints, and the traits through which the relay talks to a hub and to
//! the downstream consumer.

pub mod endpoint;
pub mod error;
pub mod event;
pub mod gating;
pub mod plugin;

pub use {
    endpoint::{EndpointTarget, RoutingEndpoint},
    error::{Error, Result},
    event::{InboundEvent, ThreadDetails, ThreadLifecycleKind},
    gating::{
        AccessDenied, AccessPolicy, AccessRequest, DmPolicy, GroupEntry, GroupPolicy, ThreadMode,
        check_access,
    },
    plugin::{
        Deliverer, Delivery, DeliveryError, HubClient, HubConnection, HubTransport, ThreadInfo,
    },
};
