pub mod error;
pub mod mitm;
pub mod profile;
pub mod tls;
pub mod transport;
pub mod upstream;

pub use error::{CaError, TransportError};
pub use mitm::CertificateAuthority;
pub use profile::ClientHelloProfile;
pub use transport::{RequestExecutor, TransportBuilder};
pub use upstream::{UpstreamKind, UpstreamProxy};
