pub mod delta;
pub mod notification;
pub mod paths;

pub use delta::{Delta, PathValue};
pub use notification::{AlarmMethod, AlarmState, Notification};
