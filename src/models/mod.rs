//! Model version lifecycle: loading, admission, reconciliation and retirement.

mod admission;
mod error;
mod instance;
mod model;
mod registry;
mod status;

pub mod discovery;
pub mod engine;
pub mod loader;
pub mod reload;

pub use admission::AdmissionGuard;
pub use discovery::{DirectoryVersionReader, DiscoveryError, VersionPolicy, VersionSource};
pub use engine::{DesiredVersions, EngineError, ModelEngine, NativeHandle, VersionConfig};
pub use error::{ServingError, StatusCode};
pub use instance::{DrainOutcome, InstanceId, LoadContext, ModelInstance, VersionSnapshot};
pub use loader::{MappedEngine, MappedModel};
pub use model::{Model, ReconcileReport, VersionRequest};
pub use registry::{ModelRegistry, ModelSnapshot, RetireSummary};
pub use reload::{ReloadDriver, TickReport};
pub use status::{TransitionError, VersionState, VersionStatus};
