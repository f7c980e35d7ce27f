pub mod confirmation;
pub mod conversation;
pub mod credential;
pub mod event;
pub mod frame;
pub mod resources;
pub mod status;
pub mod test_mode;

pub use confirmation::*;
pub use conversation::*;
pub use credential::*;
pub use event::{ArcEventTx, Event, EventTx};
pub use frame::*;
pub use resources::*;
pub use status::ChatStatus;
pub use test_mode::TestMode;
