//! Application layer: one state value, one reducer, and the controller
//! that runs generations against it.

pub mod dispatch;
pub mod state;

pub use dispatch::{App, Dispatcher, SendOutcome};
pub use state::{
    reduce, AppState, ChatPolicy, Effect, Event, GenerationTicket, InFlight, RejectReason,
    RequestId,
};
