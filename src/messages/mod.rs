//! Message types exchanged with the outside world
//!
//! Inbound events from the webhook layer, outbound commands for the
//! transport, and the delivery worker that connects the two.

pub mod delivery;
pub mod inbound;
pub mod outbound;
pub mod transport;

pub use inbound::InboundEvent;
pub use outbound::{
    ContentKind, DeliveryStatus, DeliveryTarget, Fragment, OutboundCommand, QueuedFragment,
};
pub use transport::{
    ConsoleTransport, DeliveryReceipt, DynTransport, Transport, TransportError, TransportResult,
};
