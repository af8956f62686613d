pub mod driver;
pub mod state;

pub use driver::{DriverEvent, Envelope, HostDriver};
pub use state::AppState;
