pub mod conversations;
pub mod messages;
pub mod usage_counters;

pub use conversations::Entity as Conversations;
pub use messages::Entity as Messages;
pub use usage_counters::Entity as UsageCounters;
