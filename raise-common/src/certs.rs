//! # Certificate Pinning and Bootstrap
//!
//! Client authentication on `/client` is not a CA chain check: the broker
//! keeps a list of principals it trusts, one per line as
//! `<base64 DER certificate> <name>`, and accepts a connection only if the
//! presented leaf certificate is byte-for-byte identical to one of them.
//! Names exist for operators' sake (logs, audits); they don't need to be
//! unique, only the (name, cert) pair does. This module provides that
//! comparison plus the self-signed certificate generation new clients and
//! workers use to bootstrap an identity on first run.

use std::net::{IpAddr, Ipv4Addr};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber,
};
use time::{Duration, OffsetDateTime};

use crate::error::{RaiseError, Result};

/// One day of backdating absorbs clock skew between the machine that
/// generated the certificate and the machine that first validates it.
const VALIDITY_BACKDATE: Duration = Duration::days(1);
const VALIDITY_FORWARD: Duration = Duration::days(180);

pub fn der_to_base64(der: &[u8]) -> String {
    BASE64.encode(der)
}

pub fn base64_to_der(value: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(value.trim())?)
}

/// The broker's allow-list of client principals: a name paired with the raw
/// DER of the certificate that name is allowed to connect with.
#[derive(Debug, Clone, Default)]
pub struct AuthorizedClients {
    principals: Vec<(String, Vec<u8>)>,
}

impl AuthorizedClients {
    /// Parses `<base64 DER> <name>` lines, skipping blanks and `#` comments.
    pub fn from_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut principals = Vec::new();
        for (n, line) in lines.enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.splitn(2, char::is_whitespace);
            let pin = fields.next().unwrap_or("");
            let name = fields.next().map(str::trim).unwrap_or("");
            if name.is_empty() {
                return Err(RaiseError::MalformedClientList(format!(
                    "line {}: expected '<cert> <name>'",
                    n + 1
                )));
            }
            let der = base64_to_der(pin)
                .map_err(|_| RaiseError::MalformedClientList(format!("line {}", n + 1)))?;
            principals.push((name.to_string(), der));
        }
        Ok(Self { principals })
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.principals.len()
    }

    /// Returns the matching principal's name if `der` is byte-for-byte equal
    /// to a pinned certificate.
    pub fn authorizes(&self, der: &[u8]) -> Option<&str> {
        self.principals
            .iter()
            .find(|(_, pin)| pin.as_slice() == der)
            .map(|(name, _)| name.as_str())
    }
}

/// A freshly minted self-signed identity: one certificate, one private key,
/// both forms kept around since the TLS stack wants DER and the on-disk
/// bootstrap files (and the pin a human copies into the broker's allow-list)
/// want PEM / base64.
pub struct GeneratedCert {
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
    pub cert_pem: String,
    pub key_pem: String,
}

impl GeneratedCert {
    /// The base64(DER) half of the line an operator pastes into the
    /// broker's client allow-list; it still needs a name appended.
    pub fn pin(&self) -> String {
        der_to_base64(&self.cert_der)
    }
}

/// Generates a self-signed identity suitable for either a worker's (no
/// client auth required) or a client's (must be pinned by the broker)
/// certificate. Parameters follow the original bootstrap: organization
/// "Raise", serial number 1, key/extended usages covering both server and
/// client auth so the same cert works regardless of which side of a
/// connection it ends up on, validity backdated a day and good for 180
/// days, with a loopback SAN so the cert is also valid for connecting to a
/// broker on localhost.
///
/// The key type is ECDSA P-256, not the original's RSA-2048: rcgen only
/// generates ECDSA/Ed25519 key pairs on its own, RSA keys have to come from
/// an external generator, and pinning compares whole certificates by byte
/// equality regardless of which algorithm signed them, so the key type
/// doesn't change who gets authorized.
pub fn generate_self_signed(common_name: &str) -> Result<GeneratedCert> {
    let key_pair =
        KeyPair::generate().map_err(|e| RaiseError::Other(format!("key generation failed: {e}")))?;

    let mut params = CertificateParams::new(Vec::<String>::new())
        .map_err(|e| RaiseError::Other(format!("invalid certificate params: {e}")))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "Raise");
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.serial_number = Some(SerialNumber::from(1u64));

    let now = OffsetDateTime::now_utc();
    params.not_before = now - VALIDITY_BACKDATE;
    params.not_after = now + VALIDITY_FORWARD;

    params.key_usages = vec![
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params.subject_alt_names = vec![SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST))];
    params.is_ca = IsCa::NoCa;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| RaiseError::Other(format!("self-signing failed: {e}")))?;

    Ok(GeneratedCert {
        cert_der: cert.der().to_vec(),
        key_der: key_pair.serialize_der(),
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_round_trips_through_base64() {
        let generated = generate_self_signed("test-client").unwrap();
        let pin = generated.pin();
        let decoded = base64_to_der(&pin).unwrap();
        assert_eq!(decoded, generated.cert_der);
    }

    #[test]
    fn authorizes_only_exact_matches_and_returns_the_name() {
        let a = generate_self_signed("a").unwrap();
        let b = generate_self_signed("b").unwrap();
        let line = format!("{} alice", a.pin());
        let clients = AuthorizedClients::from_lines(std::iter::once(line.as_str())).unwrap();
        assert_eq!(clients.authorizes(&a.cert_der), Some("alice"));
        assert_eq!(clients.authorizes(&b.cert_der), None);
    }

    #[test]
    fn from_lines_skips_blank_and_comment_lines() {
        let a = generate_self_signed("a").unwrap();
        let text = format!("# comment\n\n{} alice\n", a.pin());
        let clients = AuthorizedClients::from_lines(text.lines()).unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients.authorizes(&a.cert_der), Some("alice"));
    }

    #[test]
    fn from_lines_rejects_a_pin_with_no_name() {
        let a = generate_self_signed("a").unwrap();
        let result = AuthorizedClients::from_lines(std::iter::once(a.pin().as_str()));
        assert!(result.is_err());
    }
}
