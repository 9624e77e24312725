//! Engine layer: concurrent stateful components owning inbox state.

pub mod assignment;
pub mod blocklist;
pub mod clock;
pub mod conversations;
pub mod delivery_tracker;
pub mod event_feed;
pub mod message_store;
pub mod replies;
pub mod roster;
pub mod token;

pub use assignment::AssignmentResolver;
pub use blocklist::ContactBlocklist;
pub use clock::{Clock, SystemClock};
pub use conversations::{
    ConversationFilter, ConversationManager, ConversationSettings, Delivery, OutboundError,
};
pub use delivery_tracker::{AdvanceOutcome, DeliveryTracker};
pub use event_feed::EventFeed;
pub use message_store::{AppendReceipt, MessageStore};
pub use replies::ReplyLibrary;
pub use roster::AgentRoster;
