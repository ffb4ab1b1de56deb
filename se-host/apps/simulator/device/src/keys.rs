// Licensed under the Apache-2.0 license

//! Key slots of the simulated device

use std::collections::BTreeMap;
use std::fmt;

use p384::ecdsa::SigningKey;
use rand::rngs::StdRng;
use rand::RngCore;
use se_host_command_types::{DeviceError, Oid};
use zeroize::Zeroizing;

/// Factory ECC P-384 key, certified by the device certificate
pub const OID_DEVICE_KEY: Oid = 0xE0F0;

/// Factory AES-128 key
pub const OID_SYM_KEY: Oid = 0xE200;

const ECC_KEY_SLOTS: core::ops::RangeInclusive<Oid> = 0xE0F0..=0xE0F3;
const AES_KEY_SIZE: usize = 16;

#[derive(Clone)]
pub enum KeyMaterial {
    Ecc(SigningKey),
    Aes(Zeroizing<Vec<u8>>),
    /// Shared secret, pre-master secret or derived key
    Secret(Zeroizing<Vec<u8>>),
    /// Random the host must echo in front of HMAC-verified data
    AuthCode(Zeroizing<Vec<u8>>),
}

impl KeyMaterial {
    pub fn kind(&self) -> &'static str {
        match self {
            KeyMaterial::Ecc(_) => "ecc",
            KeyMaterial::Aes(_) => "aes",
            KeyMaterial::Secret(_) => "secret",
            KeyMaterial::AuthCode(_) => "auth code",
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial::{}(..)", self.kind())
    }
}

/// Persistent key slots
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    keys: BTreeMap<Oid, KeyMaterial>,
}

impl KeyStore {
    pub fn provision(rng: &mut StdRng) -> Self {
        let mut aes = Zeroizing::new(vec![0u8; AES_KEY_SIZE]);
        rng.fill_bytes(&mut aes);
        let mut keys = BTreeMap::new();
        keys.insert(OID_DEVICE_KEY, KeyMaterial::Ecc(SigningKey::random(rng)));
        keys.insert(OID_SYM_KEY, KeyMaterial::Aes(aes));
        Self { keys }
    }

    pub fn get(&self, oid: Oid) -> Option<&KeyMaterial> {
        self.keys.get(&oid)
    }

    pub fn device_key(&self) -> Result<&SigningKey, DeviceError> {
        match self.keys.get(&OID_DEVICE_KEY) {
            Some(KeyMaterial::Ecc(key)) => Ok(key),
            _ => Err(DeviceError::InternalProcess),
        }
    }

    /// Store `key` in its slot; ECC keys go to the ECC slots, AES keys to
    /// the AES slot
    pub fn store(&mut self, oid: Oid, key: KeyMaterial) -> Result<(), DeviceError> {
        let fits = match key {
            KeyMaterial::Ecc(_) => ECC_KEY_SLOTS.contains(&oid),
            KeyMaterial::Aes(_) => oid == OID_SYM_KEY,
            KeyMaterial::Secret(_) | KeyMaterial::AuthCode(_) => false,
        };
        if !fits {
            return Err(DeviceError::InvalidOid);
        }
        self.keys.insert(oid, key);
        Ok(())
    }
}
