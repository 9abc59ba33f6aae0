pub mod ids;
pub mod state;
pub mod payload;
pub mod result;
pub mod record;
pub mod priority;
pub mod counts;
pub mod events;

pub use ids::{JobId, LeaseToken, WorkerId};
pub use state::JobState;
pub use payload::{Envelope, NotificationPayload, Recipients};
pub use result::{DeliveryReceipt, DeliveryResult};
pub use record::{JobRecord, LeasedJob, NewJob};
pub use priority::JobPriority;
pub use counts::JobCounts;
pub use events::JobEvent;
