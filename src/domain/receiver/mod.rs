pub mod dto;
pub mod handler;
pub mod signature;

pub use handler::{get_event_status, receive_event};
pub use signature::{sign, verify_signature, SIGNATURE_HEADER};
