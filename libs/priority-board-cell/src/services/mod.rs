pub mod store;
pub mod planner;
pub mod applier;
pub mod history;
pub mod persistence;
pub mod notifications;
pub mod invalidation;
pub mod dispatcher;
pub mod realtime;
pub mod engine;

pub use store::*;
pub use history::*;
pub use persistence::*;
pub use notifications::*;
pub use invalidation::*;
pub use dispatcher::*;
pub use realtime::*;
pub use engine::*;
