//! Client half of the notification flow: REST access, the push transport and
//! the feed that merges both into one view state.

pub mod access;
pub mod alert;
pub mod feed;
pub mod state;
pub mod transport;

pub use access::{HttpNotificationAccess, NotificationAccess};
pub use alert::{AlertSink, TracingAlertSink};
pub use feed::{FeedDeps, FeedOptions, NotificationFeed};
pub use state::{FeedAction, FeedState, Reduction};
pub use transport::{ConnectionStatus, RealtimeClient, ReconnectPolicy};
