use semver::{Version, VersionReq};
use thiserror::Error;

/// Errors originated by the instrumentation itself.
///
/// Everything else that can go wrong belongs to the wrapped client and passes
/// through as [`ClientError`](crate::client::ClientError) without alteration.
#[derive(Debug, Error)]
pub enum InstrumentError {
    /// The resolved client module is outside the supported version contract.
    /// Raised at patch time, before any entry point is wrapped.
    #[error("unsupported pub/sub client version {found}, supported range is {supported}")]
    IncompatibleVersion {
        found: Version,
        supported: VersionReq,
    },
}
