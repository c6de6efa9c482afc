//! The client session object model: context, operations, streams.

pub mod context;
pub mod cookie;
pub(crate) mod dispatch;
pub mod memblock;
pub mod operation;
pub mod pstream;
pub mod server;
pub mod socket;
pub mod stream;
pub mod subscribe;

pub use context::{Context, ContextState, DaemonStats};
pub use cookie::{AuthCookie, COOKIE_LEN, default_cookie_path};
pub use memblock::{Memblock, MemblockStat, MemblockStatSnapshot, Memchunk};
pub use operation::{Operation, OperationState};
pub use server::{ServerAddr, default_socket_path, resolve_server};
pub use stream::{StreamDirection, StreamId, StreamState};
pub use subscribe::{
    SubscriptionEvent, SubscriptionFacility, SubscriptionMask, SubscriptionOperation,
};
