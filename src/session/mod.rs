/// Session module
///
/// Server-side refresh-token sessions: storage, the per-principal limit,
/// atomic rotation, and revocation.

mod limiter;
mod memory;
mod model;
mod postgres;
mod revocation;
mod rotation;
mod store;

pub use limiter::SessionLimiter;
pub use memory::{InMemorySessionStore, MemoryTx};
pub use model::{device_tag, NewSession, Session, SessionView, TokenHash};
pub use postgres::PgSessionStore;
pub use revocation::RevocationService;
pub use rotation::{RotationCoordinator, SessionTokens};
pub use store::SessionStore;
