//! Hub streaming relay.
//!
//! Holds one streaming session per configured org, filters and formats what
//! arrives, and hands it to the downstream consumer in per-endpoint order.

pub mod backoff;
pub mod decode;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod query;
pub mod registry;
pub mod relay;
pub mod router;
pub mod send;
pub mod session;
pub mod supervisor;
pub mod threads;
pub mod transport;

pub use {
    delivery::{ChannelDeliverer, DeliveryOutcome, SubprocessDeliverer},
    dispatch::DeliveryDispatcher,
    error::{Error, Result},
    query::{HubQuery, run_query},
    registry::{OrgRegistry, OrgSpec},
    relay::Relay,
    router::{EventRouter, RouteDecision, RoutedEvent},
    send::{SendTarget, select_org, send_message},
    session::{OrgSession, SessionExit, SessionStatus, SessionTuning},
    supervisor::SessionSupervisor,
    transport::{HttpHubClient, WsTransport},
};
