pub mod catalog;
pub mod user_agent;

pub use catalog::{FamilyProfile, FingerprintCatalog};

use haze_traits::{FingerprintError, IdentityResolver, ProxyIdentity};
use tracing::debug;

/// Resolves User-Agent strings to the closest handshake signature in a catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintResolver {
    catalog: FingerprintCatalog,
}

impl FingerprintResolver {
    pub fn new(catalog: FingerprintCatalog) -> Self {
        Self { catalog }
    }

    /// Looks up the profile token for an already-classified browser.
    pub fn lookup(&self, family: &str, version: &str) -> Result<&'static str, FingerprintError> {
        let profile = self
            .catalog
            .family(family)
            .ok_or_else(|| FingerprintError::UnrecognizedBrowser(family.to_string()))?;

        let major = version
            .split('.')
            .next()
            .filter(|m| !m.is_empty() && m.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| FingerprintError::UnparsableVersion(version.to_string()))?;
        // Majors past u32 still rank above every catalogued version.
        let major = major.parse::<u32>().unwrap_or(u32::MAX);

        Ok(profile.select(major))
    }

    pub fn supported_browsers(&self) -> Vec<&'static str> {
        self.catalog.browsers()
    }

    pub fn supported_versions(&self, family: &str) -> Vec<u32> {
        self.catalog.versions(family)
    }
}

impl IdentityResolver for FingerprintResolver {
    fn resolve(&self, ua: &str) -> Result<ProxyIdentity, FingerprintError> {
        let agent = user_agent::parse(ua)
            .ok_or_else(|| FingerprintError::UnrecognizedBrowser("unknown".to_string()))?;
        let token = self.lookup(agent.name, &agent.version)?;
        debug!("User-Agent {} {} -> profile {}", agent.name, agent.version, token);
        Ok(ProxyIdentity::new(agent.name, token))
    }
}
