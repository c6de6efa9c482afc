#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod mainloop;
pub mod proto;
pub mod sample;
pub mod telemetry;
pub mod test_harness;

pub use error::{Error, ErrorCode};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the session object model at the crate root for convenience
pub use crate::client::{
    AuthCookie, Context, ContextState, DaemonStats, MemblockStat, MemblockStatSnapshot, Operation,
    OperationState, ServerAddr, StreamDirection, StreamId, StreamState, SubscriptionEvent,
    SubscriptionFacility, SubscriptionMask, SubscriptionOperation,
};
pub use crate::config::ClientConfig;
pub use crate::mainloop::{EventSource, Interest, Mainloop};
pub use crate::sample::{SampleFormat, SampleSpec};
