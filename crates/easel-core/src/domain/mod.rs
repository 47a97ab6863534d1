//! Domain model: ids, request state machine, records, dispatch shapes.

pub mod dispatch;
pub mod ids;
pub mod record;
pub mod state;

pub use dispatch::{DispatchError, DispatchFailure, ErrorClass, GenerationOutput};
pub use ids::RequestId;
pub use record::{Priority, RequestRecord};
pub use state::RequestState;
