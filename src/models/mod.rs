//! Domain models for RaspberryIO.
//!
//! # Aggregator
//!
//! - [`FeedType`]: a category of feeds, optionally open to self-service additions.
//! - [`Feed`]: an external blog, visible only once approved and while not defunct.
//! - [`FeedItem`]: an entry of a feed, keyed by its external guid.
//! - [`Subscription`]: a PubSubHubbub subscription delivering feed updates.
//!
//! # Community
//!
//! - [`User`] and [`Group`]: accounts and named groups (e.g. feed approvers).
//! - [`Follow`]: a directed edge of the social graph.
//! - [`Action`]: an activity stream entry produced by social actions.
//! - [`Project`]: a member's project write-up, draft until published.

mod feed;
mod project;
mod subscription;
mod user;

pub use feed::*;
pub use project::*;
pub use subscription::*;
pub use user::*;
