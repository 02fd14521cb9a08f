pub mod clock;
pub mod commands;
pub mod controller;
mod driver;
mod persist;
pub mod policy;
pub mod resume;
pub mod state;

pub use clock::{Clock, SystemClock};
pub use controller::{TimerConfig, TimerController, TimerEvent};
pub use policy::BreakRatio;
pub use resume::Resumption;
pub use state::{TimerMode, TimerState};
