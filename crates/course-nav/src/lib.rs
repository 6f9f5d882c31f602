pub mod bus;
pub mod doctor;
pub mod error;
pub mod geo;
pub mod gnss;
pub mod navdata;
pub mod notifier;
pub mod persist;
pub mod reconciler;
pub mod store;
pub mod watcher;

pub use error::{EmitError, PersistError, ValidationError};
pub use navdata::{Mutation, NavData, NavField, Position};
pub use reconciler::{CommandResult, CourseHandle, Reconciler, ReconcilerConfig};
