pub mod clock;
pub mod event_bus;
pub mod reactive;
pub mod scheduler;
pub mod task;
pub mod throttle;

pub use clock::*;
pub use event_bus::*;
pub use reactive::*;
pub use scheduler::*;
pub use task::*;
pub use throttle::*;
