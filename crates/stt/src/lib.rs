//! STT provider adapters.
//!
//! One capability set — start, poll, fetch, cancel — over two external
//! speech-to-text back ends (Google STT and AssemblyAI). Adapters are
//! stateless translators between our normalized types and each vendor's
//! wire format; retry and state live in the orchestrator and worker.

pub mod assemblyai;
pub mod google;
pub mod registry;
pub mod traits;
mod util;

pub use registry::SttRegistry;
pub use traits::{
    SttJobHandle, SttJobRequest, SttJobState, SttProvider, SttResult, SttSegment,
};
