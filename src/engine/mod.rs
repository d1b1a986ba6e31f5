//! Level-by-level execution of plans against a driver.

mod cancel;
mod executor;
mod resolve;
mod result;
mod status;

pub use cancel::CancelSignal;
pub use executor::{ApplyEngine, DEFAULT_MAX_PARALLEL};
pub use resolve::{interpolate, resolve_exports, resolve_inputs};
pub use result::ApplyResult;
pub use status::{ResourceAction, ResourceState, ResourceStatus};
