//! AIOps Authorization Gateway (C9, spec §4.6): the door the AIOps
//! subsystem uses to reach C6/C8. Verifies the internal JWT issued by
//! C4, re-reads live RBAC, and only then executes — so a permission
//! revoked after the JWT was minted is honored immediately rather than
//! at the JWT's (already short) expiry.

pub mod error;
pub mod model;
pub mod service;

#[cfg(test)]
test_r::enable!();

pub use error::AiopsError;
pub use service::{AiopsGateway, AiopsGatewayDefault};
