//! Key package creation and validation.
//!
//! A key package is a signed, single-use pre-key bundle. A member who
//! wants to join publishes one; the committer who adds them encrypts the
//! group's joining secret to the package's init key. The signature binds
//! the init key, the credential, and the advertised capabilities to the
//! holder's signature key, so a forged package fails verification before
//! it can influence the tree.
//!
//! Packages are not reusable. Each call to
//! [`crate::session::DaveSession::create_key_package`] generates a fresh
//! init key and replaces the previous pending package.

use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use tls_codec::{Deserialize, Serialize, TlsDeserialize, TlsSerialize, TlsSize, VLBytes};
use x25519_dalek::{PublicKey, StaticSecret};

use davey_crypto::{
    Ciphersuite, CryptoError, SIGNATURE_KEY_LEN, SUPPORTED_SUITES, SigningKeyPair, X25519_KEY_LEN,
    verify_signature,
};

use crate::errors::KeyPackageError;

/// Domain separation prefix for key package signatures.
const SIGNATURE_LABEL: &[u8] = b"davey10 key package";

/// Domain separation prefix for key package hash references.
const HASH_REF_LABEL: &[u8] = b"davey10 key package ref";

/// Identity a key package asserts.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct Credential {
    user_id: u64,
}

impl Credential {
    /// User id this credential asserts.
    #[must_use]
    pub fn user_id(&self) -> u64 {
        self.user_id
    }
}

/// Protocol versions and ciphersuites the package holder can negotiate.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct Capabilities {
    versions: Vec<u16>,
    suites: Vec<u16>,
}

/// Signed pre-key bundle advertising a member for addition to a group.
#[derive(Debug, Clone, PartialEq, Eq, TlsSerialize, TlsDeserialize, TlsSize)]
pub struct KeyPackage {
    protocol_version: u16,
    suite_id: u16,
    init_key: VLBytes,
    signature_key: VLBytes,
    credential: Credential,
    capabilities: Capabilities,
    signature: VLBytes,
}

/// The signed portion of a key package.
#[derive(TlsSerialize, TlsSize)]
struct KeyPackageTbs {
    protocol_version: u16,
    suite_id: u16,
    init_key: VLBytes,
    signature_key: VLBytes,
    credential: Credential,
    capabilities: Capabilities,
}

impl KeyPackage {
    /// Decodes a key package from its wire form.
    ///
    /// Decoding performs no validation. Call [`KeyPackage::verify`]
    /// before trusting any field.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPackageError::MalformedPackage`] if the bytes do not
    /// decode exactly into a key package.
    pub fn decode(bytes: &[u8]) -> Result<Self, KeyPackageError> {
        Self::tls_deserialize_exact(bytes).map_err(|e| KeyPackageError::MalformedPackage {
            reason: e.to_string(),
        })
    }

    /// Serializes the package into its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPackageError::MalformedPackage`] if a field exceeds
    /// the wire format's length limits.
    pub fn encode(&self) -> Result<Vec<u8>, KeyPackageError> {
        self.tls_serialize_detached()
            .map_err(|e| KeyPackageError::MalformedPackage {
                reason: e.to_string(),
            })
    }

    /// Validates the package: suite support, key lengths, capability
    /// self-consistency, and the signature over the signed portion.
    ///
    /// # Errors
    ///
    /// - [`KeyPackageError::UnsupportedSuite`] if the suite id is not
    ///   registered.
    /// - [`KeyPackageError::UnsupportedVersion`] if the protocol version
    ///   is zero.
    /// - [`KeyPackageError::MalformedPackage`] if a key has the wrong
    ///   length or the capabilities do not cover the package's own
    ///   version and suite.
    /// - [`KeyPackageError::InvalidSignature`] if the signature does not
    ///   verify under the package's signature key.
    pub fn verify(&self) -> Result<(), KeyPackageError> {
        Ciphersuite::resolve(self.suite_id).map_err(|_| KeyPackageError::UnsupportedSuite {
            suite_id: self.suite_id,
        })?;
        if self.protocol_version == 0 {
            return Err(KeyPackageError::UnsupportedVersion {
                version: self.protocol_version,
            });
        }
        if self.init_key.as_slice().len() != X25519_KEY_LEN {
            return Err(KeyPackageError::MalformedPackage {
                reason: format!("init key is {} bytes", self.init_key.as_slice().len()),
            });
        }
        if self.signature_key.as_slice().len() != SIGNATURE_KEY_LEN {
            return Err(KeyPackageError::MalformedPackage {
                reason: format!(
                    "signature key is {} bytes",
                    self.signature_key.as_slice().len()
                ),
            });
        }
        if !self.capabilities.versions.contains(&self.protocol_version) {
            return Err(KeyPackageError::MalformedPackage {
                reason: "capabilities do not include the package's own version".to_string(),
            });
        }
        if !self.capabilities.suites.contains(&self.suite_id) {
            return Err(KeyPackageError::MalformedPackage {
                reason: "capabilities do not include the package's own suite".to_string(),
            });
        }

        let message = self.signed_message()?;
        verify_signature(
            self.signature_key.as_slice(),
            &message,
            self.signature.as_slice(),
        )
        .map_err(|e| match e {
            CryptoError::InvalidSignature => KeyPackageError::InvalidSignature,
            other => KeyPackageError::Crypto(other),
        })
    }

    /// Computes the hash reference used to address this package in a
    /// welcome message.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPackageError::MalformedPackage`] if the package
    /// cannot be serialized.
    pub fn hash_ref(&self) -> Result<Vec<u8>, KeyPackageError> {
        let serialized = self.encode()?;
        let mut hasher = Sha256::new();
        hasher.update(HASH_REF_LABEL);
        hasher.update(&serialized);
        Ok(hasher.finalize().to_vec())
    }

    /// Protocol version the package was built for.
    #[must_use]
    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    /// Ciphersuite identifier the package was built for.
    #[must_use]
    pub fn suite_id(&self) -> u16 {
        self.suite_id
    }

    /// User id the package's credential asserts.
    #[must_use]
    pub fn user_id(&self) -> u64 {
        self.credential.user_id
    }

    /// Public init key the committer encrypts the joining secret to.
    #[must_use]
    pub fn init_key(&self) -> &[u8] {
        self.init_key.as_slice()
    }

    /// Public signature key of the package holder.
    #[must_use]
    pub fn signature_key(&self) -> &[u8] {
        self.signature_key.as_slice()
    }

    /// Serializes the signed portion with its domain label.
    fn signed_message(&self) -> Result<Vec<u8>, KeyPackageError> {
        let tbs = KeyPackageTbs {
            protocol_version: self.protocol_version,
            suite_id: self.suite_id,
            init_key: self.init_key.clone(),
            signature_key: self.signature_key.clone(),
            credential: self.credential.clone(),
            capabilities: self.capabilities.clone(),
        };
        let tbs_bytes = tbs
            .tls_serialize_detached()
            .map_err(|e| KeyPackageError::MalformedPackage {
                reason: e.to_string(),
            })?;
        let mut message = Vec::with_capacity(SIGNATURE_LABEL.len() + tbs_bytes.len());
        message.extend_from_slice(SIGNATURE_LABEL);
        message.extend_from_slice(&tbs_bytes);
        Ok(message)
    }
}

/// A key package together with the private half of its init key.
///
/// The private half never leaves the bundle. It is consumed when a
/// welcome message addressed to this package is processed.
pub struct KeyPackageBundle {
    key_package: KeyPackage,
    serialized: Vec<u8>,
    init_secret: StaticSecret,
}

impl KeyPackageBundle {
    /// Generates a fresh key package signed with `signer`.
    ///
    /// # Errors
    ///
    /// - [`KeyPackageError::UnsupportedVersion`] if `protocol_version`
    ///   is zero.
    /// - [`KeyPackageError::MalformedPackage`] if serialization fails.
    pub fn generate<R: RngCore + CryptoRng>(
        protocol_version: u16,
        suite: Ciphersuite,
        user_id: u64,
        signer: &SigningKeyPair,
        rng: &mut R,
    ) -> Result<Self, KeyPackageError> {
        if protocol_version == 0 {
            return Err(KeyPackageError::UnsupportedVersion {
                version: protocol_version,
            });
        }

        let init_secret = StaticSecret::random_from_rng(&mut *rng);
        let init_public = PublicKey::from(&init_secret);

        let mut suites: Vec<u16> = SUPPORTED_SUITES.iter().map(|s| s.id()).collect();
        if !suites.contains(&suite.id()) {
            suites.push(suite.id());
        }
        let tbs = KeyPackageTbs {
            protocol_version,
            suite_id: suite.id(),
            init_key: init_public.as_bytes().to_vec().into(),
            signature_key: signer.public_key().to_vec().into(),
            credential: Credential { user_id },
            capabilities: Capabilities {
                versions: vec![protocol_version],
                suites,
            },
        };
        let tbs_bytes = tbs
            .tls_serialize_detached()
            .map_err(|e| KeyPackageError::MalformedPackage {
                reason: e.to_string(),
            })?;
        let mut message = Vec::with_capacity(SIGNATURE_LABEL.len() + tbs_bytes.len());
        message.extend_from_slice(SIGNATURE_LABEL);
        message.extend_from_slice(&tbs_bytes);
        let signature = signer.sign(&message);

        let key_package = KeyPackage {
            protocol_version: tbs.protocol_version,
            suite_id: tbs.suite_id,
            init_key: tbs.init_key,
            signature_key: tbs.signature_key,
            credential: tbs.credential,
            capabilities: tbs.capabilities,
            signature: signature.to_vec().into(),
        };
        let serialized = key_package.encode()?;

        Ok(Self {
            key_package,
            serialized,
            init_secret,
        })
    }

    /// The public key package.
    #[must_use]
    pub fn key_package(&self) -> &KeyPackage {
        &self.key_package
    }

    /// Cached wire form of the key package.
    #[must_use]
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    /// Private half of the init key.
    pub(crate) fn init_secret(&self) -> &StaticSecret {
        &self.init_secret
    }
}

impl std::fmt::Debug for KeyPackageBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPackageBundle")
            .field("key_package", &self.key_package)
            .field("init_secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    fn test_bundle(user_id: u64) -> (KeyPackageBundle, SigningKeyPair) {
        let signer = SigningKeyPair::generate(&mut OsRng);
        let bundle = KeyPackageBundle::generate(
            1,
            Ciphersuite::default_suite(),
            user_id,
            &signer,
            &mut OsRng,
        )
        .unwrap();
        (bundle, signer)
    }

    #[test]
    fn generated_package_verifies() {
        let (bundle, signer) = test_bundle(1001);
        let package = bundle.key_package();
        package.verify().unwrap();
        assert_eq!(package.user_id(), 1001);
        assert_eq!(package.protocol_version(), 1);
        assert_eq!(package.signature_key(), signer.public_key());
    }

    #[test]
    fn package_round_trips_through_wire_form() {
        let (bundle, _) = test_bundle(7);
        let decoded = KeyPackage::decode(bundle.serialized()).unwrap();
        assert_eq!(&decoded, bundle.key_package());
        decoded.verify().unwrap();
    }

    #[test]
    fn tampered_init_key_fails_verification() {
        let (bundle, _) = test_bundle(7);
        let mut package = bundle.key_package().clone();
        let mut key = package.init_key.as_slice().to_vec();
        key[0] ^= 0x01;
        package.init_key = key.into();
        assert_eq!(package.verify(), Err(KeyPackageError::InvalidSignature));
    }

    #[test]
    fn tampered_user_id_fails_verification() {
        let (bundle, _) = test_bundle(7);
        let mut package = bundle.key_package().clone();
        package.credential = Credential { user_id: 8 };
        assert_eq!(package.verify(), Err(KeyPackageError::InvalidSignature));
    }

    #[test]
    fn truncated_bytes_are_malformed() {
        let (bundle, _) = test_bundle(7);
        let bytes = bundle.serialized();
        let err = KeyPackage::decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, KeyPackageError::MalformedPackage { .. }));
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let (bundle, _) = test_bundle(7);
        let mut bytes = bundle.serialized().to_vec();
        bytes.push(0);
        let err = KeyPackage::decode(&bytes).unwrap_err();
        assert!(matches!(err, KeyPackageError::MalformedPackage { .. }));
    }

    #[test]
    fn version_zero_is_rejected_at_generation() {
        let signer = SigningKeyPair::generate(&mut OsRng);
        let err =
            KeyPackageBundle::generate(0, Ciphersuite::default_suite(), 7, &signer, &mut OsRng)
                .unwrap_err();
        assert_eq!(err, KeyPackageError::UnsupportedVersion { version: 0 });
    }

    #[test]
    fn unknown_suite_is_rejected_on_verify() {
        let (bundle, _) = test_bundle(7);
        let mut package = bundle.key_package().clone();
        package.suite_id = 0x7777;
        assert_eq!(
            package.verify(),
            Err(KeyPackageError::UnsupportedSuite { suite_id: 0x7777 })
        );
    }

    #[test]
    fn hash_ref_is_stable_and_distinct() {
        let (bundle_a, _) = test_bundle(1);
        let (bundle_b, _) = test_bundle(2);
        let ref_a1 = bundle_a.key_package().hash_ref().unwrap();
        let ref_a2 = bundle_a.key_package().hash_ref().unwrap();
        let ref_b = bundle_b.key_package().hash_ref().unwrap();
        assert_eq!(ref_a1, ref_a2);
        assert_ne!(ref_a1, ref_b);
        assert_eq!(ref_a1.len(), 32);
    }

    #[test]
    fn fresh_packages_rotate_init_keys() {
        let signer = SigningKeyPair::generate(&mut OsRng);
        let suite = Ciphersuite::default_suite();
        let a = KeyPackageBundle::generate(1, suite, 7, &signer, &mut OsRng).unwrap();
        let b = KeyPackageBundle::generate(1, suite, 7, &signer, &mut OsRng).unwrap();
        assert_ne!(a.key_package().init_key(), b.key_package().init_key());
    }
}
