pub mod events;
pub mod logging;

pub use events::{Event, HandlerId};
