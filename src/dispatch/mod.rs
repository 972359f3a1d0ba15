pub mod classify;
pub mod engine;
pub mod rewrite;
pub mod transform;

pub use classify::Disposition;
pub use engine::DispatchEngine;
pub use rewrite::{HostRequest, PreparedRequest};
pub use transform::{HostResponse, PassthroughTransformer, ResponseTransformer};
