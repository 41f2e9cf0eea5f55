pub mod broadcaster;
pub mod events;
pub mod mirror;
pub mod sse;
pub mod subscriptions;
pub mod ws;

pub use broadcaster::Broadcaster;
pub use events::PollEvent;
pub use mirror::PollMirror;
pub use subscriptions::{ConnectionGuard, ConnectionId, ConnectionState, SubscriptionManager};
