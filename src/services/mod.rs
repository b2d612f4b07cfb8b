//! Delivery pipeline services.
//!
//! Leaf services (classification, templating, suppression, recipients,
//! delivery) are composed by the [`SendOrchestrator`], which the
//! [`DispatchService`] exposes together with the scheduler operations.

pub mod classifier;
pub mod delivery;
pub mod dispatch_service;
pub mod gateway;
pub mod orchestrator;
pub mod recipient_service;
pub mod suppression_service;
pub mod template;

#[cfg(test)]
pub(crate) mod testing;

pub use classifier::{FailureCategory, classify};
pub use delivery::{BatchEvent, DeliveryEngine, OutboundMessage, SendOutcome, TransientHalt};
pub use dispatch_service::{DEFAULT_BACKFILL_BATCH_SIZE, DispatchService};
pub use gateway::{GatewayResponse, LogGateway, SmsGateway, TwilioGateway, build_gateway};
pub use orchestrator::{BatchReport, SendOrchestrator};
pub use recipient_service::RecipientService;
pub use suppression_service::{BackfillReport, FailureSummary, FilterOutcome, SuppressionService};
pub use template::MessageTemplate;
