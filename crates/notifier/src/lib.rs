//! Fan-out notifier: subscriber registry, push delivery and the broadcast
//! coordinator that ties them together.
//!
//! ```text
//! registry.list_all()
//!     ↓
//! adapter.deliver() per subscriber (bounded parallelism)
//!     ↓
//! permanent failure → registry.remove(endpoint)
//!     ↓
//! BroadcastReport
//! ```

pub mod calendar;
pub mod coordinator;
pub mod delivery;
pub mod registry;

pub use calendar::{CalendarError, GateDecision, GoogleCalendar, HolidayCalendar, HolidayGate};
pub use coordinator::{BroadcastCoordinator, BroadcastError};
pub use delivery::{DeliveryAdapter, DeliveryResult, WebPushDelivery};
pub use registry::{InMemoryRegistry, PgSubscriberRegistry, RegistryError, SubscriberRegistry};
