#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stashkit_core::encryption::key_derivation::{
    derive_domain_key, derive_storage_key, key_fingerprint, MAX_DOMAIN_LENGTH, MAX_SALT_LENGTH,
    MIN_MASTER_KEY_LENGTH,
};

#[derive(Arbitrary, Debug)]
struct KeyDerivationInput {
    master_key: Vec<u8>,
    domain: String,
    salt: Vec<u8>,
    secret: String,
    namespace: String,
}

fuzz_target!(|input: KeyDerivationInput| {
    // Validates: no panics, input limits enforced, deterministic output,
    // domain and salt separation

    let KeyDerivationInput {
        master_key,
        domain,
        salt,
        secret,
        namespace,
    } = input;

    let valid = master_key.len() >= MIN_MASTER_KEY_LENGTH
        && !domain.is_empty()
        && domain.len() <= MAX_DOMAIN_LENGTH
        && !salt.is_empty()
        && salt.len() <= MAX_SALT_LENGTH;

    match derive_domain_key(&master_key, &domain, &salt) {
        Ok(key) => {
            assert!(valid, "out-of-range input accepted");

            // Determinism
            let again = derive_domain_key(&master_key, &domain, &salt).unwrap();
            assert_eq!(key, again);
            assert_eq!(key_fingerprint(&key), key_fingerprint(&again));

            // Separation: a different salt yields a different key
            let mut other_salt = salt.clone();
            other_salt[0] ^= 0xff;
            if let Ok(other) = derive_domain_key(&master_key, &domain, &other_salt) {
                assert_ne!(key, other, "salts collided");
            }
        }
        Err(_) => assert!(!valid, "valid input rejected"),
    }

    // The configured-secret path must never panic either
    if let Ok(key) = derive_storage_key(&secret, &namespace) {
        assert!(secret.len() >= MIN_MASTER_KEY_LENGTH);
        assert_eq!(key, derive_storage_key(&secret, &namespace).unwrap());
    }
});
