use crate::error::CaError;
use dashmap::DashMap;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::ServerConfig;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

/// Local certificate authority used to terminate intercepted tunnels.
pub struct CertificateAuthority {
    ca: Certificate,
    ca_der: Vec<u8>,
    // host -> ready server config with a leaf for that host
    leaves: DashMap<String, Arc<ServerConfig>>,
}

impl CertificateAuthority {
    /// Loads the CA pair, generating and persisting a new one when neither file exists.
    pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        match (cert_path.exists(), key_path.exists()) {
            (true, true) => {
                let cert_pem = fs::read_to_string(cert_path)?;
                let key_pem = fs::read_to_string(key_path)?;
                debug!("Loaded CA from {}", cert_path.display());
                return Self::from_pem(&cert_pem, &key_pem).map_err(|e| match e {
                    CaError::NoCertificate(_) => CaError::NoCertificate(cert_path.to_path_buf()),
                    other => other,
                });
            }
            (true, false) => {
                return Err(CaError::IncompletePair {
                    present: cert_path.to_path_buf(),
                    missing: key_path.to_path_buf(),
                })
            }
            (false, true) => {
                return Err(CaError::IncompletePair {
                    present: key_path.to_path_buf(),
                    missing: cert_path.to_path_buf(),
                })
            }
            (false, false) => {}
        }

        let (cert_pem, key_pem) = Self::generate_pem()?;
        fs::write(cert_path, &cert_pem)?;
        fs::write(key_path, &key_pem)?;
        info!(
            "Generated new CA at {} (trust it in your client to intercept HTTPS)",
            cert_path.display()
        );
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Self-signed ECDSA P-256 CA as `(cert_pem, key_pem)`.
    pub fn generate_pem() -> Result<(String, String), CaError> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Hazetunnel CA");
        dn.push(DnType::OrganizationName, "Hazetunnel");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = rcgen::date_time_ymd(2024, 1, 1);
        params.not_after = rcgen::date_time_ymd(2044, 1, 1);

        let cert = Certificate::from_params(params)?;
        Ok((cert.serialize_pem()?, cert.serialize_private_key_pem()))
    }

    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CaError> {
        let key = KeyPair::from_pem(key_pem)?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem, key)?;
        let ca = Certificate::from_params(params)?;

        let ca_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())?
            .into_iter()
            .next()
            .ok_or_else(|| CaError::NoCertificate("<pem>".into()))?;

        Ok(Self {
            ca,
            ca_der,
            leaves: DashMap::new(),
        })
    }

    /// DER of the CA certificate clients must trust.
    pub fn ca_der(&self) -> &[u8] {
        &self.ca_der
    }

    /// Server config presenting a leaf for `host`, issued on first use.
    pub fn server_config(&self, host: &str) -> Result<Arc<ServerConfig>, CaError> {
        if let Some(config) = self.leaves.get(host) {
            return Ok(config.value().clone());
        }

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        params.distinguished_name = dn;
        params.subject_alt_names = vec![match host.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(host.to_string()),
        }];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.not_before = rcgen::date_time_ymd(2024, 1, 1);
        params.not_after = rcgen::date_time_ymd(2044, 1, 1);

        let leaf = Certificate::from_params(params)?;
        let leaf_der = leaf.serialize_der_with_signer(&self.ca)?;
        let key_der = leaf.serialize_private_key_der();

        let mut config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(
                vec![rustls::Certificate(leaf_der), rustls::Certificate(self.ca_der.clone())],
                rustls::PrivateKey(key_der),
            )?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        let config = Arc::new(config);
        self.leaves.insert(host.to_string(), config.clone());
        debug!("Issued leaf certificate for {}", host);
        Ok(config)
    }

    pub fn acceptor(&self, host: &str) -> Result<TlsAcceptor, CaError> {
        Ok(TlsAcceptor::from(self.server_config(host)?))
    }
}
