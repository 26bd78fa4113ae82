//! In-memory stores for contexts, realms, and preload scripts
//!
//! The stores are the sole owners of their entities; everything else holds
//! opaque ids and goes through a store to reach a neighbor. Mutations
//! complete synchronously under a short-lived lock.

pub mod contexts;
pub mod preload;
pub mod realms;

pub use contexts::BrowsingContextStorage;
pub use preload::PreloadScriptStorage;
pub use realms::{RealmFilter, RealmStorage, SandboxFilter};
