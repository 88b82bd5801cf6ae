pub mod hosted;
pub mod stub;

pub use hosted::{HostedInferenceClient, HostedInferenceConfig};
pub use stub::StubInferenceClient;
