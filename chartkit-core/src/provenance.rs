//! Detached-signature verification over a packaged chart archive (spec §2,
//! §6 "Provenance file"). The `pgp` crate is an enrichment over the
//! teacher's own dependency graph — neither `shipcat` nor any other example
//! repo carries a PGP dependency — pulled in because the distilled spec
//! requires this capability and `pgp` is the closest ecosystem-standard fit
//! (see DESIGN.md).

use std::collections::BTreeMap;

use pgp::composed::cleartext::CleartextSignedMessage;
use pgp::composed::{Deserializable, SignedPublicKey};
use sha2::{Digest, Sha256};

use super::{Error, ErrorKind, Result};

/// A caller-supplied set of public keys a provenance signature is checked
/// against. Any one matching key is sufficient.
pub struct Keyring {
    keys: Vec<SignedPublicKey>,
}

impl Keyring {
    pub fn from_armored_bytes(raw: &[u8]) -> Result<Keyring> {
        let mut keys = Vec::new();
        for result in SignedPublicKey::from_armor_many(raw)
            .map_err(|e| Error::from(ErrorKind::ProvenanceInvalid(format!("invalid keyring: {}", e))))?
            .0
        {
            let key = result.map_err(|e| Error::from(ErrorKind::ProvenanceInvalid(format!("invalid key: {}", e))))?;
            keys.push(key);
        }
        Ok(Keyring { keys })
    }
}

#[derive(Deserialize)]
struct SumBlock {
    files: BTreeMap<String, String>,
}

/// Verify a clear-signed `.prov` file: the signature must check out against
/// some key in `keyring`, and the `files` sum block it carries must list
/// `archive_filename` with a digest matching `archive_bytes`'s actual
/// sha256.
pub fn verify(prov_bytes: &[u8], archive_bytes: &[u8], archive_filename: &str, keyring: &Keyring) -> Result<()> {
    let raw = std::str::from_utf8(prov_bytes)
        .map_err(|e| Error::from(ErrorKind::ProvenanceInvalid(format!("provenance file is not utf8: {}", e))))?;
    let (signed, _headers) = CleartextSignedMessage::from_string(raw)
        .map_err(|e| Error::from(ErrorKind::ProvenanceInvalid(format!("malformed provenance file: {}", e))))?;

    let verified = keyring.keys.iter().any(|key| signed.verify(key).is_ok());
    if !verified {
        bail!(ErrorKind::ProvenanceInvalid(
            "signature does not match any key in the supplied keyring".to_string()
        ));
    }

    let body = signed.signed_text();
    let sum_block = body
        .split("\n...\n")
        .nth(1)
        .unwrap_or("");
    let sums: SumBlock = serde_yaml::from_str(sum_block)
        .map_err(|e| Error::from(ErrorKind::ProvenanceInvalid(format!("malformed sum block: {}", e))))?;
    let expected = sums
        .files
        .get(archive_filename)
        .ok_or_else(|| Error::from(ErrorKind::ProvenanceInvalid(format!("no digest recorded for '{}'", archive_filename))))?;

    let mut hasher = Sha256::new();
    hasher.input(archive_bytes);
    let actual = format!("sha256:{:x}", hasher.result());
    if &actual != expected {
        bail!(ErrorKind::ProvenanceInvalid(format!(
            "archive digest {} does not match recorded digest {}",
            actual, expected
        )));
    }
    Ok(())
}
