//! 服务层

pub mod dto;
pub mod issuance_service;
pub mod lookup_service;
pub mod payment_gate;
pub mod redemption_engine;

pub use dto::*;
pub use issuance_service::IssuanceService;
pub use lookup_service::LookupService;
pub use payment_gate::PaymentGate;
pub use redemption_engine::RedemptionEngine;
