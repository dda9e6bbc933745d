use sha2::{Digest, Sha256};

/// Number of hex digits kept from the SHA-256 digest. Annotation values derived from it
/// must stay below 64 characters.
pub const FINGERPRINT_LENGTH: usize = 63;

pub const FINGERPRINT_SEPARATOR: &'static str = ":";

/// Change-detection token over an ordered list of request parameters.
///
/// The fields are joined with [`FINGERPRINT_SEPARATOR`], hashed with SHA-256 and the lower-case
/// hex digest is truncated to [`FINGERPRINT_LENGTH`] characters. Field order and separator are
/// part of the persisted format, changing either forces every request to be re-provisioned.
pub fn fingerprint<S: AsRef<str>>(fields: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update(FINGERPRINT_SEPARATOR.as_bytes());
        }
        hasher.update(field.as_ref().as_bytes());
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(FINGERPRINT_LENGTH);
    digest
}
