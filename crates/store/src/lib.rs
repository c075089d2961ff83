pub mod error;
pub mod key;
pub mod store;
pub mod testing;

pub use error::StoreError;
pub use key::{CounterKey, CounterKind};
pub use store::{CounterSlot, CounterStore, SemaphoreToken};
