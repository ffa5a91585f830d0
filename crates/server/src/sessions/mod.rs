pub mod dispatch;
pub mod handle;
pub mod liveness;
pub mod registry;
pub mod ws;

pub use handle::SessionHandle;
pub use liveness::LivenessMonitor;
pub use registry::{ConnectOutcome, SessionInfo, SessionRegistry, SessionState};
