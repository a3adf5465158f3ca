//! Server-sent event stream handling for the plan endpoint
//!
//! Bytes flow through [`FrameDecoder`] into [`interpret`] and are settled by
//! [`drive`], which [`crate::api::TripClient`] runs under a
//! [`SessionController`] slot.

pub mod decoder;
pub mod event;
pub mod session;

pub use decoder::FrameDecoder;
pub use event::{interpret, AgentId, AgentProgress, AgentStatus, StreamEvent, TripPlan};
pub use session::{drive, SessionController, SessionHandle};
