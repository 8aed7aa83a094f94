use boring::error::ErrorStack;
use boring::ssl::{SslConnector, SslMethod, SslVerifyMode, SslVersion};
use haze_traits::ProxyIdentity;

const CHROME_CIPHERS: &str = "ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:\
ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:\
ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305:\
ECDHE-RSA-AES128-SHA:ECDHE-RSA-AES256-SHA:\
AES128-GCM-SHA256:AES256-GCM-SHA384:AES128-SHA:AES256-SHA";

const FIREFOX_CIPHERS: &str = "ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:\
ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305:\
ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:\
ECDHE-ECDSA-AES256-SHA:ECDHE-ECDSA-AES128-SHA:ECDHE-RSA-AES128-SHA:ECDHE-RSA-AES256-SHA:\
AES128-GCM-SHA256:AES256-GCM-SHA384:AES128-SHA:AES256-SHA";

const SAFARI_CIPHERS: &str = "ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-ECDSA-AES128-GCM-SHA256:\
ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-AES256-GCM-SHA384:\
ECDHE-RSA-AES128-GCM-SHA256:ECDHE-RSA-CHACHA20-POLY1305:\
ECDHE-ECDSA-AES256-SHA:ECDHE-ECDSA-AES128-SHA:ECDHE-RSA-AES256-SHA:ECDHE-RSA-AES128-SHA:\
AES256-GCM-SHA384:AES128-GCM-SHA256:AES256-SHA:AES128-SHA";

const CHROME_SIGALGS: &str = "ecdsa_secp256r1_sha256:rsa_pss_rsae_sha256:rsa_pkcs1_sha256:\
ecdsa_secp384r1_sha384:rsa_pss_rsae_sha384:rsa_pkcs1_sha384:\
rsa_pss_rsae_sha512:rsa_pkcs1_sha512";

const FIREFOX_SIGALGS: &str = "ecdsa_secp256r1_sha256:ecdsa_secp384r1_sha384:ecdsa_secp521r1_sha512:\
rsa_pss_rsae_sha256:rsa_pss_rsae_sha384:rsa_pss_rsae_sha512:\
rsa_pkcs1_sha256:rsa_pkcs1_sha384:rsa_pkcs1_sha512";

const SAFARI_SIGALGS: &str = "ecdsa_secp256r1_sha256:rsa_pss_rsae_sha256:rsa_pkcs1_sha256:\
ecdsa_secp384r1_sha384:rsa_pss_rsae_sha384:rsa_pkcs1_sha384:\
rsa_pss_rsae_sha512:rsa_pkcs1_sha512";

const H2_AND_H1: &[&str] = &["h2", "http/1.1"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    Tls10,
    Tls12,
    Tls13,
}

impl TlsVersion {
    fn ssl(self) -> SslVersion {
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }
}

/// ClientHello shape applied to a BoringSSL connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloProfile {
    pub ciphers: &'static str,
    pub curves: &'static str,
    pub sigalgs: &'static str,
    pub grease: bool,
    pub permute_extensions: bool,
    pub ocsp_stapling: bool,
    pub signed_cert_timestamps: bool,
    pub alpn: &'static [&'static str],
    pub min_version: TlsVersion,
    pub max_version: TlsVersion,
}

impl ClientHelloProfile {
    fn chrome(permute_extensions: bool) -> Self {
        Self {
            ciphers: CHROME_CIPHERS,
            curves: "X25519:P-256:P-384",
            sigalgs: CHROME_SIGALGS,
            grease: true,
            permute_extensions,
            ocsp_stapling: true,
            signed_cert_timestamps: true,
            alpn: H2_AND_H1,
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
        }
    }

    fn firefox() -> Self {
        Self {
            ciphers: FIREFOX_CIPHERS,
            curves: "X25519:P-256:P-384:P-521",
            sigalgs: FIREFOX_SIGALGS,
            grease: false,
            permute_extensions: false,
            ocsp_stapling: true,
            signed_cert_timestamps: false,
            alpn: H2_AND_H1,
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
        }
    }

    fn safari() -> Self {
        Self {
            ciphers: SAFARI_CIPHERS,
            curves: "X25519:P-256:P-384:P-521",
            sigalgs: SAFARI_SIGALGS,
            grease: true,
            permute_extensions: false,
            ocsp_stapling: true,
            signed_cert_timestamps: true,
            alpn: H2_AND_H1,
            min_version: TlsVersion::Tls10,
            max_version: TlsVersion::Tls13,
        }
    }

    fn okhttp() -> Self {
        Self {
            grease: false,
            ocsp_stapling: false,
            signed_cert_timestamps: false,
            ..Self::chrome(false)
        }
    }

    /// Picks the profile matching a resolved identity. Unknown families get Chrome.
    pub fn for_identity(identity: &ProxyIdentity) -> Self {
        match identity.browser_family.as_str() {
            "Firefox" => Self::firefox(),
            "Safari" | "iOS" => Self::safari(),
            "Android" => Self::okhttp(),
            // Edge 85, 360 and QQ predate Chrome's extension shuffling
            "Edge" | "360Browser" | "QQBrowser" => Self::chrome(false),
            _ => Self::chrome(token_major(&identity.version_token) >= 106),
        }
    }

    pub fn alpn_wire(&self) -> Vec<u8> {
        let mut wire = Vec::new();
        for proto in self.alpn {
            wire.push(proto.len() as u8);
            wire.extend_from_slice(proto.as_bytes());
        }
        wire
    }

    /// Builds a connector that skips origin certificate verification.
    pub fn connector(&self) -> Result<SslConnector, ErrorStack> {
        let mut builder = SslConnector::builder(SslMethod::tls())?;
        builder.set_verify(SslVerifyMode::NONE);
        builder.set_min_proto_version(Some(self.min_version.ssl()))?;
        builder.set_max_proto_version(Some(self.max_version.ssl()))?;
        builder.set_cipher_list(self.ciphers)?;
        builder.set_curves_list(self.curves)?;
        builder.set_sigalgs_list(self.sigalgs)?;
        builder.set_grease_enabled(self.grease);
        builder.set_permute_extensions(self.permute_extensions);
        if self.ocsp_stapling {
            builder.enable_ocsp_stapling();
        }
        if self.signed_cert_timestamps {
            builder.enable_signed_cert_timestamps();
        }
        if !self.alpn.is_empty() {
            builder.set_alpn_protos(&self.alpn_wire())?;
        }
        Ok(builder.build())
    }
}

/// Leading number of a token such as `112_PSK` or `12.1`.
fn token_major(token: &str) -> u32 {
    let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}
