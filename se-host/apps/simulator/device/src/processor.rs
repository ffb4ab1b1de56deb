// Licensed under the Apache-2.0 license

//! APDU processor of the simulated device
//!
//! Answers every command family the host library frames. Data objects, key
//! slots and hibernated application contexts survive power cycles; the
//! application state (session keys, authorizations, running hash and
//! symmetric sequences, staged protected updates) is reset by opening,
//! closing and power loss.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::mem;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use hmac::{Hmac, Mac};
use log::{debug, trace, warn};
use p384::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use p384::PublicKey;
use rand::rngs::StdRng;
use rand::RngCore;
use se_host_channel::{ChannelCrypto, SoftwareCrypto};
use se_host_command_types::{
    session_index, ApduCommand, ApduHeader, ContextHandle, DeviceError, HashAlgorithm, KeyType,
    KeyAgreementScheme, KeyDerivation, Oid, ResponseHeader, SignatureScheme, SymKeyType,
    SymMode, SymSequence, UpdateStage, WriteMode, APDU_FAILURE, APDU_HEADER_SIZE, APDU_SUCCESS,
    APPLICATION_ID, CLEAR_LAST_ERROR, CONTEXT_HANDLE_SIZE, DERIVE_MIN_KEY_LENGTH,
    DERIVE_TAG_DERIVATION_DATA, DERIVE_TAG_EXPORT, DERIVE_TAG_KEY_LENGTH, DERIVE_TAG_SECRET_OID,
    DERIVE_TAG_STORE, HASH_TAG_CONTEXT_OUT, HASH_TAG_DIGEST, HASH_TAG_INTERMEDIATE_CONTEXT,
    KEYPAIR_TAG_EXPORT, KEYPAIR_TAG_KEY_USAGE, KEYPAIR_TAG_PRIVATE_KEY_OID,
    KEYPAIR_TAG_RESP_PRIVATE_KEY, KEYPAIR_TAG_RESP_PUBLIC_KEY, LAST_ERROR_CODE_OID,
    MANIFEST_VERSION_1, MAX_RANDOM_LENGTH, MIN_RANDOM_LENGTH, OID_PLATFORM_BINDING_SECRET,
    RANDOM_TAG_OPTIONAL_DATA, SIGN_TAG_DIGEST, SIGN_TAG_KEY_OID, SSEC_TAG_ALGORITHM,
    SSEC_TAG_EXPORT, SSEC_TAG_PRIVATE_KEY, SSEC_TAG_PUBLIC_KEY, SSEC_TAG_STORE_SESSION,
    SYMKEY_TAG_EXPORT, SYMKEY_TAG_OID, SYMKEY_TAG_RESP_KEY, SYMKEY_TAG_USAGE, SYM_TAG_IV,
    SYM_TAG_OUT_DATA, SYM_TAG_VERIFICATION_DATA, VERIFY_TAG_ALGORITHM, VERIFY_TAG_CERT_OID,
    VERIFY_TAG_DIGEST, VERIFY_TAG_PUBLIC_KEY, VERIFY_TAG_SIGNATURE,
};
use se_host_commands::ApduReader;
use sha2::{Digest, Sha256};
use zerocopy::{FromBytes, IntoBytes};
use zeroize::Zeroizing;

use crate::keys::{KeyMaterial, KeyStore};
use crate::objects::ObjectStore;

type DeviceResult<T> = Result<T, DeviceError>;
type HmacSha256 = Hmac<Sha256>;

const AES_BLOCK_SIZE: usize = 16;
const AES_128_KEY_SIZE: usize = 16;
const MAX_DERIVED_KEY_LENGTH: u16 = 256;

/// Exported hash contexts kept by the device; the oldest is evicted first
const MAX_HASH_CONTEXTS: usize = 16;
const HASH_CONTEXT_MAGIC: [u8; 4] = *b"HC\0\0";

const ARBITRARY_DATA: core::ops::RangeInclusive<Oid> = 0xF1D0..=0xF1DF;

/// Application state lost on open, close and power loss
#[derive(Clone, Default)]
struct AppState {
    sessions: BTreeMap<Oid, KeyMaterial>,
    /// Secrets whose HMAC verification succeeded
    authorized: BTreeSet<Oid>,
    sym: Option<SymState>,
    hash: Option<Sha256>,
    update: Option<UpdateStaging>,
}

#[derive(Clone)]
struct SymState {
    command: ApduCommand,
    mode: SymMode,
    key: Oid,
    engine: SymEngine,
}

#[derive(Clone)]
enum SymEngine {
    Block {
        cipher: Aes128,
        /// CBC chaining value
        chain: Option<[u8; AES_BLOCK_SIZE]>,
    },
    Hmac(HmacSha256),
}

#[derive(Clone)]
struct UpdateStaging {
    target: Oid,
    data: Vec<u8>,
}

/// TLVs of one request, in order
struct Tlvs<'a>(Vec<(u8, &'a [u8])>);

impl<'a> Tlvs<'a> {
    fn parse(payload: &'a [u8]) -> DeviceResult<Self> {
        let mut reader = ApduReader::new(payload);
        let mut tlvs = Vec::new();
        while !reader.is_empty() {
            tlvs.push(reader.get_tlv().map_err(malformed)?);
        }
        Ok(Self(tlvs))
    }

    fn first(&self) -> Option<(u8, &'a [u8])> {
        self.0.first().copied()
    }

    fn get(&self, tag: u8) -> Option<&'a [u8]> {
        self.0.iter().find(|(t, _)| *t == tag).map(|(_, v)| *v)
    }

    fn has(&self, tag: u8) -> bool {
        self.get(tag).is_some()
    }

    fn require(&self, tag: u8) -> DeviceResult<&'a [u8]> {
        self.get(tag).ok_or(DeviceError::InvalidDataField)
    }

    fn u16(&self, tag: u8) -> DeviceResult<Option<u16>> {
        match self.get(tag) {
            None => Ok(None),
            Some(&[hi, lo]) => Ok(Some(u16::from_be_bytes([hi, lo]))),
            Some(_) => Err(DeviceError::InvalidLengthField),
        }
    }

    fn require_u16(&self, tag: u8) -> DeviceResult<u16> {
        self.u16(tag)?.ok_or(DeviceError::InvalidDataField)
    }
}

fn malformed<E>(_: E) -> DeviceError {
    DeviceError::InvalidLengthField
}

fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + value.len());
    out.push(tag);
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
    out
}

fn response(status: u8, payload: &[u8]) -> Vec<u8> {
    let header = ResponseHeader::new(status, payload.len() as u16);
    let mut out = Vec::with_capacity(APDU_HEADER_SIZE + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

fn check_signature_scheme(param: u8) -> DeviceResult<()> {
    match param {
        p if p == SignatureScheme::Ecdsa as u8 => Ok(()),
        p if p == SignatureScheme::RsaPkcs1v15Sha256 as u8
            || p == SignatureScheme::RsaPkcs1v15Sha384 as u8
            || p == SignatureScheme::RsaPkcs1v15Sha512 as u8 =>
        {
            Err(DeviceError::CommandNotAvailable)
        }
        _ => Err(DeviceError::InvalidParamField),
    }
}

fn check_p384(algorithm: &[u8]) -> DeviceResult<()> {
    match algorithm {
        [id] if *id == KeyType::EccNistP384 as u8 => Ok(()),
        [id] if KeyType::from_id(*id).is_some() => Err(DeviceError::CommandNotAvailable),
        _ => Err(DeviceError::InvalidDataField),
    }
}

pub struct ApduProcessor {
    objects: ObjectStore,
    keys: KeyStore,
    app: AppState,
    hibernated: HashMap<ContextHandle, AppState>,
    hash_contexts: BTreeMap<u32, Sha256>,
    next_hash_context: u32,
    last_error: u8,
    rng: StdRng,
}

impl ApduProcessor {
    /// Provision a fresh device; the platform binding secret doubles as the
    /// contents of its data object
    pub fn new(binding_secret: &[u8], uid: &[u8], mut rng: StdRng) -> Self {
        let keys = KeyStore::provision(&mut rng);
        let certificate = match keys.device_key() {
            Ok(key) => key.verifying_key().to_encoded_point(false).as_bytes().to_vec(),
            Err(_) => Vec::new(),
        };
        Self {
            objects: ObjectStore::provision(uid, &certificate, binding_secret),
            keys,
            app: AppState::default(),
            hibernated: HashMap::new(),
            hash_contexts: BTreeMap::new(),
            next_hash_context: 1,
            last_error: 0,
            rng,
        }
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn last_error(&self) -> u8 {
        self.last_error
    }

    pub fn hibernated_contexts(&self) -> usize {
        self.hibernated.len()
    }

    /// Drop the application state as a power loss would
    pub fn power_cycle(&mut self) {
        self.app = AppState::default();
    }

    /// Fail `apdu` with `code` without executing it
    pub fn fail(&mut self, apdu: &[u8], code: u8) -> Vec<u8> {
        warn!(
            "Injected device error {:#04x} for command {:#04x}",
            code,
            apdu.first().copied().unwrap_or_default()
        );
        self.last_error = code;
        response(APDU_FAILURE, &[])
    }

    /// Execute one APDU and return the response APDU
    pub fn process(&mut self, apdu: &[u8]) -> Vec<u8> {
        let (header, body) = match ApduHeader::read_from_prefix(apdu) {
            Ok(split) => split,
            Err(_) => return self.failure(DeviceError::InvalidLengthField),
        };
        if header.cmd & CLEAR_LAST_ERROR != 0 {
            self.last_error = 0;
        }
        if header.len.get() as usize != body.len() {
            return self.failure(DeviceError::InvalidLengthField);
        }

        let result = match ApduCommand::from_code(header.cmd) {
            Some(command) => {
                trace!("Processing {} ({} bytes)", command.name(), body.len());
                self.dispatch(command, header.param, body)
            }
            None => Err(DeviceError::InvalidCommandField),
        };
        match result {
            Ok(payload) => response(APDU_SUCCESS, &payload),
            Err(err) => {
                debug!("Command {:#04x} failed: {:?}", header.cmd, err);
                self.failure(err)
            }
        }
    }

    fn failure(&mut self, err: DeviceError) -> Vec<u8> {
        self.last_error = err.code();
        response(APDU_FAILURE, &[])
    }

    fn dispatch(&mut self, command: ApduCommand, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        match command {
            ApduCommand::GetDataObject => self.get_data_object(param, payload),
            ApduCommand::SetDataObject => self.set_data_object(param, payload),
            ApduCommand::SetObjectProtected => self.set_object_protected(param, payload),
            ApduCommand::GetRandom => self.get_random(param, payload),
            ApduCommand::EncryptSym | ApduCommand::DecryptSym => self.sym(command, param, payload),
            ApduCommand::EncryptAsym | ApduCommand::DecryptAsym => {
                Err(DeviceError::CommandNotAvailable)
            }
            ApduCommand::CalcHash => self.calc_hash(param, payload),
            ApduCommand::CalcSign => self.calc_sign(param, payload),
            ApduCommand::VerifySign => self.verify_sign(param, payload),
            ApduCommand::CalcSsec => self.calc_ssec(param, payload),
            ApduCommand::DeriveKey => self.derive_key(param, payload),
            ApduCommand::GenKeyPair => self.gen_key_pair(param, payload),
            ApduCommand::GenSymKey => self.gen_sym_key(param, payload),
            ApduCommand::OpenApplication => self.open_application(param, payload),
            ApduCommand::CloseApplication => self.close_application(param, payload),
        }
    }

    fn get_data_object(&mut self, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        let mut reader = ApduReader::new(payload);
        let oid = reader.get_u16().map_err(malformed)?;
        let offset = reader.get_u16().map_err(malformed)?;
        let length = reader.get_u16().map_err(malformed)?;
        if oid == LAST_ERROR_CODE_OID {
            return Ok(vec![mem::take(&mut self.last_error)]);
        }
        match param {
            0x00 => self.objects.read(oid, offset, length, &self.app.authorized),
            0x01 => self.objects.read_metadata(oid),
            _ => Err(DeviceError::InvalidParamField),
        }
    }

    fn set_data_object(&mut self, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        let mode = match param {
            p if p == WriteMode::Write as u8 => WriteMode::Write,
            p if p == WriteMode::EraseAndWrite as u8 => WriteMode::EraseAndWrite,
            p if p == WriteMode::Metadata as u8 => WriteMode::Metadata,
            _ => return Err(DeviceError::InvalidParamField),
        };
        let mut reader = ApduReader::new(payload);
        let oid = reader.get_u16().map_err(malformed)?;
        let offset = reader.get_u16().map_err(malformed)?;
        let data = reader.get_bytes(reader.remaining()).map_err(malformed)?;
        if oid == LAST_ERROR_CODE_OID {
            return Err(DeviceError::AccessConditionNotSatisfied);
        }
        self.objects.write(oid, mode, offset, data)?;
        Ok(Vec::new())
    }

    fn set_object_protected(&mut self, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        if param != MANIFEST_VERSION_1 {
            return Err(DeviceError::InvalidManifest);
        }
        let mut reader = ApduReader::new(payload);
        let (tag, value) = reader.get_tlv().map_err(malformed)?;
        if !reader.is_empty() {
            return Err(DeviceError::InvalidLengthField);
        }
        let stage = UpdateStage::from_tag(tag).ok_or(DeviceError::InvalidDataField)?;
        match stage {
            UpdateStage::Start => {
                let target = match value {
                    [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
                    _ => return Err(DeviceError::InvalidManifest),
                };
                self.objects.check_writable(target)?;
                debug!("Protected update of {:#06x} started", target);
                self.app.update = Some(UpdateStaging {
                    target,
                    data: Vec::new(),
                });
            }
            UpdateStage::Continue => {
                let staging = self
                    .app
                    .update
                    .as_mut()
                    .ok_or(DeviceError::CommandOutOfSequence)?;
                staging.data.extend_from_slice(value);
            }
            UpdateStage::Final => {
                let mut staging = self
                    .app
                    .update
                    .take()
                    .ok_or(DeviceError::CommandOutOfSequence)?;
                staging.data.extend_from_slice(value);
                debug!(
                    "Protected update of {:#06x} committed, {} bytes",
                    staging.target,
                    staging.data.len()
                );
                self.objects.replace(staging.target, staging.data)?;
            }
        }
        Ok(Vec::new())
    }

    fn get_random(&mut self, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        let mut reader = ApduReader::new(payload);
        let length = reader.get_u16().map_err(malformed)?;
        if !(MIN_RANDOM_LENGTH..=MAX_RANDOM_LENGTH).contains(&length) {
            return Err(DeviceError::InvalidLengthField);
        }
        let pre_master = match param {
            0x00 | 0x01 => false,
            0x04 => true,
            _ => return Err(DeviceError::InvalidParamField),
        };
        let length = length as usize;

        if reader.is_empty() {
            if pre_master {
                return Err(DeviceError::InvalidDataField);
            }
            let mut random = vec![0u8; length];
            self.rng.fill_bytes(&mut random);
            return Ok(random);
        }

        let session = reader.get_u16().map_err(malformed)?;
        let optional: &[u8] = if reader.is_empty() {
            &[]
        } else {
            match reader.get_tlv().map_err(malformed)? {
                (RANDOM_TAG_OPTIONAL_DATA, value) => value,
                _ => return Err(DeviceError::InvalidDataField),
            }
        };

        if pre_master {
            if optional.len() >= length {
                return Err(DeviceError::InvalidLengthField);
            }
            let mut secret = Zeroizing::new(optional.to_vec());
            let mut random = vec![0u8; length - optional.len()];
            self.rng.fill_bytes(&mut random);
            secret.extend_from_slice(&random);
            self.store_session(session, KeyMaterial::Secret(secret))?;
            return Ok(Vec::new());
        }

        let mut random = vec![0u8; length];
        self.rng.fill_bytes(&mut random);
        let mut code = Zeroizing::new(optional.to_vec());
        code.extend_from_slice(&random);
        self.store_session(session, KeyMaterial::AuthCode(code))?;
        Ok(random)
    }

    fn calc_hash(&mut self, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        if param != HashAlgorithm::Sha256 as u8 {
            return Err(DeviceError::InvalidParamField);
        }
        let tlvs = Tlvs::parse(payload)?;
        let (sequence, data) = tlvs.first().ok_or(DeviceError::InvalidDataField)?;
        let (start, last) = match sequence {
            0x00 => (true, false),
            0x01 => (true, true),
            0x02 => (false, false),
            0x03 => (false, true),
            _ => return Err(DeviceError::InvalidDataField),
        };

        let context_in = match tlvs.get(HASH_TAG_INTERMEDIATE_CONTEXT) {
            Some(context) => Some(hash_context_id(context)?),
            None => None,
        };
        let mut hasher = if start {
            Sha256::new()
        } else if let Some(id) = context_in {
            self.hash_contexts
                .get(&id)
                .cloned()
                .ok_or(DeviceError::InvalidDataField)?
        } else {
            self.app.hash.take().ok_or(DeviceError::CommandOutOfSequence)?
        };
        hasher.update(data);

        if last {
            self.app.hash = None;
            if let Some(id) = context_in {
                self.hash_contexts.remove(&id);
            }
            return Ok(tlv(HASH_TAG_DIGEST, &hasher.finalize()));
        }
        if tlvs.has(HASH_TAG_CONTEXT_OUT) {
            self.app.hash = None;
            let id = self.export_hash_context(context_in, hasher);
            return Ok(tlv(HASH_TAG_INTERMEDIATE_CONTEXT, &hash_context_handle(id)));
        }
        self.app.hash = Some(hasher);
        Ok(Vec::new())
    }

    fn export_hash_context(&mut self, reuse: Option<u32>, hasher: Sha256) -> u32 {
        let id = match reuse {
            Some(id) => id,
            None => {
                let id = self.next_hash_context;
                self.next_hash_context = self.next_hash_context.wrapping_add(1).max(1);
                id
            }
        };
        self.hash_contexts.insert(id, hasher);
        while self.hash_contexts.len() > MAX_HASH_CONTEXTS {
            self.hash_contexts.pop_first();
        }
        id
    }

    fn calc_sign(&mut self, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        check_signature_scheme(param)?;
        let tlvs = Tlvs::parse(payload)?;
        let digest = tlvs.require(SIGN_TAG_DIGEST)?;
        let key = self.ecc_key(tlvs.require_u16(SIGN_TAG_KEY_OID)?)?;
        let signature: Signature = key
            .sign_prehash(digest)
            .map_err(|_| DeviceError::InvalidDataField)?;
        Ok(signature.to_bytes().to_vec())
    }

    fn verify_sign(&mut self, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        check_signature_scheme(param)?;
        let tlvs = Tlvs::parse(payload)?;
        let digest = tlvs.require(VERIFY_TAG_DIGEST)?;
        let signature = Signature::from_slice(tlvs.require(VERIFY_TAG_SIGNATURE)?)
            .map_err(|_| DeviceError::InvalidDataField)?;

        let verifying_key = match tlvs.u16(VERIFY_TAG_CERT_OID)? {
            Some(oid) => {
                let certificate = &self.objects.get(oid)?.data;
                VerifyingKey::from_sec1_bytes(certificate)
                    .map_err(|_| DeviceError::InvalidCertificateFormat)?
            }
            None => {
                check_p384(tlvs.require(VERIFY_TAG_ALGORITHM)?)?;
                VerifyingKey::from_sec1_bytes(tlvs.require(VERIFY_TAG_PUBLIC_KEY)?)
                    .map_err(|_| DeviceError::InvalidDataField)?
            }
        };
        verifying_key
            .verify_prehash(digest, &signature)
            .map_err(|_| DeviceError::SignatureVerificationFailure)?;
        Ok(Vec::new())
    }

    fn calc_ssec(&mut self, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        if param != KeyAgreementScheme::Ecdh as u8 {
            return Err(DeviceError::InvalidParamField);
        }
        let tlvs = Tlvs::parse(payload)?;
        check_p384(tlvs.require(SSEC_TAG_ALGORITHM)?)?;
        let public = PublicKey::from_sec1_bytes(tlvs.require(SSEC_TAG_PUBLIC_KEY)?)
            .map_err(|_| DeviceError::InvalidDataField)?;
        let key = self.ecc_key(tlvs.require_u16(SSEC_TAG_PRIVATE_KEY)?)?;
        let shared = p384::ecdh::diffie_hellman(key.as_nonzero_scalar(), public.as_affine());
        let secret = Zeroizing::new(shared.raw_secret_bytes().to_vec());
        self.deliver_secret(&tlvs, SSEC_TAG_EXPORT, SSEC_TAG_STORE_SESSION, secret)
    }

    fn derive_key(&mut self, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        let method = KeyDerivation::from_id(param).ok_or(DeviceError::InvalidParamField)?;
        if method != KeyDerivation::TlsPrfSha256 {
            return Err(DeviceError::CommandNotAvailable);
        }
        let tlvs = Tlvs::parse(payload)?;
        let secret = self.secret(tlvs.require_u16(DERIVE_TAG_SECRET_OID)?)?;
        let seed = tlvs.require(DERIVE_TAG_DERIVATION_DATA)?;
        let length = tlvs.require_u16(DERIVE_TAG_KEY_LENGTH)?;
        if !(DERIVE_MIN_KEY_LENGTH..=MAX_DERIVED_KEY_LENGTH).contains(&length) {
            return Err(DeviceError::InvalidLengthField);
        }

        let mut derived = Zeroizing::new(vec![0u8; length as usize]);
        SoftwareCrypto::new()
            .prf(&secret, &[], seed, &mut derived)
            .map_err(|_| DeviceError::InternalProcess)?;
        self.deliver_secret(&tlvs, DERIVE_TAG_EXPORT, DERIVE_TAG_STORE, derived)
    }

    fn deliver_secret(
        &mut self,
        tlvs: &Tlvs<'_>,
        export_tag: u8,
        store_tag: u8,
        secret: Zeroizing<Vec<u8>>,
    ) -> DeviceResult<Vec<u8>> {
        if tlvs.has(export_tag) {
            return Ok(secret.to_vec());
        }
        let session = tlvs.require_u16(store_tag)?;
        self.store_session(session, KeyMaterial::Secret(secret))?;
        Ok(Vec::new())
    }

    fn gen_key_pair(&mut self, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        let key_type = KeyType::from_id(param).ok_or(DeviceError::InvalidParamField)?;
        if key_type != KeyType::EccNistP384 {
            return Err(DeviceError::CommandNotAvailable);
        }
        let tlvs = Tlvs::parse(payload)?;
        tlvs.require(KEYPAIR_TAG_KEY_USAGE)?;

        let key = SigningKey::random(&mut self.rng);
        let public = key.verifying_key().to_encoded_point(false);
        let mut out = tlv(KEYPAIR_TAG_RESP_PUBLIC_KEY, public.as_bytes());
        if tlvs.has(KEYPAIR_TAG_EXPORT) {
            out.extend_from_slice(&tlv(KEYPAIR_TAG_RESP_PRIVATE_KEY, &key.to_bytes()));
        } else {
            let oid = tlvs.require_u16(KEYPAIR_TAG_PRIVATE_KEY_OID)?;
            self.store_key(oid, KeyMaterial::Ecc(key))?;
        }
        Ok(out)
    }

    fn gen_sym_key(&mut self, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        match SymKeyType::from_id(param) {
            Some(SymKeyType::Aes128) => {}
            Some(_) => return Err(DeviceError::CommandNotAvailable),
            None => return Err(DeviceError::InvalidParamField),
        }
        let tlvs = Tlvs::parse(payload)?;
        tlvs.require(SYMKEY_TAG_USAGE)?;

        let mut key = Zeroizing::new(vec![0u8; AES_128_KEY_SIZE]);
        self.rng.fill_bytes(&mut key);
        if tlvs.has(SYMKEY_TAG_EXPORT) {
            return Ok(tlv(SYMKEY_TAG_RESP_KEY, &key));
        }
        let oid = tlvs.require_u16(SYMKEY_TAG_OID)?;
        self.store_key(oid, KeyMaterial::Aes(key))?;
        Ok(Vec::new())
    }

    fn sym(&mut self, command: ApduCommand, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        let mode = SymMode::from_id(param).ok_or(DeviceError::InvalidParamField)?;
        let mut reader = ApduReader::new(payload);
        let key = reader.get_u16().map_err(malformed)?;
        let sequence =
            SymSequence::from_id(reader.get_u8().map_err(malformed)?).ok_or(DeviceError::InvalidParamField)?;
        let length = reader.get_u16().map_err(malformed)? as usize;

        if command == ApduCommand::DecryptSym && mode.is_hmac() {
            let session = reader.get_u16().map_err(malformed)?;
            let data_len = length.checked_sub(2).ok_or(DeviceError::InvalidLengthField)?;
            let data = reader.get_bytes(data_len).map_err(malformed)?;
            let tlvs = Tlvs::parse(reader.get_bytes(reader.remaining()).map_err(malformed)?)?;
            return self.hmac_verify(mode, sequence, key, session, data, &tlvs);
        }

        let data = reader.get_bytes(length).map_err(malformed)?;
        let tlvs = Tlvs::parse(reader.get_bytes(reader.remaining()).map_err(malformed)?)?;
        let result = self.sym_step(command, mode, sequence, key, data, &tlvs);
        if result.is_err() || sequence.is_final() {
            self.app.sym = None;
        }
        result
    }

    fn sym_step(
        &mut self,
        command: ApduCommand,
        mode: SymMode,
        sequence: SymSequence,
        key: Oid,
        data: &[u8],
        tlvs: &Tlvs<'_>,
    ) -> DeviceResult<Vec<u8>> {
        let mut state = if sequence.is_start() {
            SymState {
                command,
                mode,
                key,
                engine: self.sym_engine(mode, key, tlvs)?,
            }
        } else {
            match self.app.sym.take() {
                Some(state) if state.command == command && state.mode == mode && state.key == key => {
                    state
                }
                _ => return Err(DeviceError::CommandOutOfSequence),
            }
        };

        let out = match &mut state.engine {
            SymEngine::Block { cipher, chain } => {
                if data.len() % AES_BLOCK_SIZE != 0 {
                    return Err(DeviceError::InvalidLengthField);
                }
                let mut out = data.to_vec();
                let encrypt = command == ApduCommand::EncryptSym;
                for block in out.chunks_exact_mut(AES_BLOCK_SIZE) {
                    process_block(cipher, chain, encrypt, block);
                }
                tlv(SYM_TAG_OUT_DATA, &out)
            }
            SymEngine::Hmac(mac) => {
                mac.update(data);
                if sequence.is_final() {
                    tlv(SYM_TAG_OUT_DATA, &mac.clone().finalize().into_bytes())
                } else {
                    Vec::new()
                }
            }
        };
        if !sequence.is_final() {
            self.app.sym = Some(state);
        }
        Ok(out)
    }

    fn sym_engine(&self, mode: SymMode, key: Oid, tlvs: &Tlvs<'_>) -> DeviceResult<SymEngine> {
        match mode {
            SymMode::Ecb | SymMode::Cbc => {
                let key = match self.key_material(key)? {
                    KeyMaterial::Aes(key) => key,
                    _ => return Err(DeviceError::InvalidOid),
                };
                let cipher = Aes128::new_from_slice(key).map_err(|_| DeviceError::InternalProcess)?;
                let chain = if mode == SymMode::Cbc {
                    let iv: [u8; AES_BLOCK_SIZE] = tlvs
                        .require(SYM_TAG_IV)?
                        .try_into()
                        .map_err(|_| DeviceError::InvalidDataField)?;
                    Some(iv)
                } else {
                    None
                };
                Ok(SymEngine::Block { cipher, chain })
            }
            SymMode::HmacSha256 => {
                let secret = self.secret(key)?;
                let mac = <HmacSha256 as Mac>::new_from_slice(&secret).map_err(|_| DeviceError::InternalProcess)?;
                Ok(SymEngine::Hmac(mac))
            }
            SymMode::CbcMac | SymMode::Cmac | SymMode::HmacSha384 | SymMode::HmacSha512 => {
                Err(DeviceError::CommandNotAvailable)
            }
        }
    }

    /// HMAC verification against a session auth code, or clearing the
    /// authorization of `secret` when no data and no MAC are sent
    fn hmac_verify(
        &mut self,
        mode: SymMode,
        sequence: SymSequence,
        secret: Oid,
        session: Oid,
        data: &[u8],
        tlvs: &Tlvs<'_>,
    ) -> DeviceResult<Vec<u8>> {
        if mode != SymMode::HmacSha256 {
            return Err(DeviceError::CommandNotAvailable);
        }
        let Some(expected) = tlvs.get(SYM_TAG_VERIFICATION_DATA) else {
            if data.is_empty() {
                debug!("Authorization of {:#06x} cleared", secret);
                self.app.authorized.remove(&secret);
                return Ok(Vec::new());
            }
            return Err(DeviceError::AuthorizationFailure);
        };
        if sequence != SymSequence::StartFinal {
            return Err(DeviceError::AuthorizationFailure);
        }

        let code = match self.app.sessions.remove(&session) {
            Some(KeyMaterial::AuthCode(code)) => code,
            Some(other) => {
                self.app.sessions.insert(session, other);
                return Err(DeviceError::AuthorizationFailure);
            }
            None => return Err(DeviceError::AuthorizationFailure),
        };
        if !data.starts_with(&code) {
            return Err(DeviceError::AuthorizationFailure);
        }
        let key = self.secret(secret)?;
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(&key).map_err(|_| DeviceError::InternalProcess)?;
        mac.update(data);
        mac.verify_slice(expected)
            .map_err(|_| DeviceError::AuthorizationFailure)?;
        debug!("Authorization of {:#06x} granted", secret);
        self.app.authorized.insert(secret);
        Ok(Vec::new())
    }

    fn open_application(&mut self, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        if payload.len() < APPLICATION_ID.len() {
            return Err(DeviceError::InvalidLengthField);
        }
        let (application, handle) = payload.split_at(APPLICATION_ID.len());
        if application != APPLICATION_ID {
            return Err(DeviceError::InvalidDataField);
        }
        match param {
            0x00 if handle.is_empty() => {
                self.app = AppState::default();
                debug!("Application opened");
            }
            0x01 => {
                let handle: ContextHandle = handle
                    .try_into()
                    .map_err(|_| DeviceError::InvalidLengthField)?;
                self.app = self
                    .hibernated
                    .remove(&handle)
                    .ok_or(DeviceError::InvalidDataField)?;
                debug!("Application restored from hibernation");
            }
            0x00 => return Err(DeviceError::InvalidLengthField),
            _ => return Err(DeviceError::InvalidParamField),
        }
        Ok(Vec::new())
    }

    fn close_application(&mut self, param: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        if !payload.is_empty() {
            return Err(DeviceError::InvalidLengthField);
        }
        match param {
            0x00 => {
                self.app = AppState::default();
                Ok(Vec::new())
            }
            0x01 => {
                let mut handle = [0u8; CONTEXT_HANDLE_SIZE];
                while handle == [0u8; CONTEXT_HANDLE_SIZE] || self.hibernated.contains_key(&handle) {
                    self.rng.fill_bytes(&mut handle);
                }
                self.hibernated.insert(handle, mem::take(&mut self.app));
                debug!("Application hibernated");
                Ok(handle.to_vec())
            }
            _ => Err(DeviceError::InvalidParamField),
        }
    }

    fn store_session(&mut self, oid: Oid, key: KeyMaterial) -> DeviceResult<()> {
        if session_index(oid).is_none() {
            return Err(DeviceError::InvalidOid);
        }
        trace!("Session {:#06x} now holds {}", oid, key.kind());
        self.app.sessions.insert(oid, key);
        Ok(())
    }

    fn store_key(&mut self, oid: Oid, key: KeyMaterial) -> DeviceResult<()> {
        if session_index(oid).is_some() {
            return self.store_session(oid, key);
        }
        self.keys.store(oid, key)
    }

    fn key_material(&self, oid: Oid) -> DeviceResult<&KeyMaterial> {
        let key = if session_index(oid).is_some() {
            self.app.sessions.get(&oid)
        } else {
            self.keys.get(oid)
        };
        key.ok_or(DeviceError::InvalidOid)
    }

    fn ecc_key(&self, oid: Oid) -> DeviceResult<&SigningKey> {
        match self.key_material(oid)? {
            KeyMaterial::Ecc(key) => Ok(key),
            _ => Err(DeviceError::InvalidOid),
        }
    }

    /// Secret bytes for derivation and HMAC: a session secret or an
    /// arbitrary-data object
    fn secret(&self, oid: Oid) -> DeviceResult<Zeroizing<Vec<u8>>> {
        if ARBITRARY_DATA.contains(&oid) || oid == OID_PLATFORM_BINDING_SECRET {
            let data = &self.objects.get(oid)?.data;
            if data.is_empty() {
                return Err(DeviceError::InvalidDataField);
            }
            return Ok(Zeroizing::new(data.clone()));
        }
        match self.key_material(oid)? {
            KeyMaterial::Secret(secret) | KeyMaterial::Aes(secret) => Ok(secret.clone()),
            _ => Err(DeviceError::AccessConditionNotSatisfied),
        }
    }
}

fn process_block(
    cipher: &Aes128,
    chain: &mut Option<[u8; AES_BLOCK_SIZE]>,
    encrypt: bool,
    block: &mut [u8],
) {
    match (chain.as_mut(), encrypt) {
        (None, true) => cipher.encrypt_block(GenericArray::from_mut_slice(block)),
        (None, false) => cipher.decrypt_block(GenericArray::from_mut_slice(block)),
        (Some(previous), true) => {
            block.iter_mut().zip(previous.iter()).for_each(|(b, p)| *b ^= p);
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
            previous.copy_from_slice(block);
        }
        (Some(previous), false) => {
            let mut ciphertext = [0u8; AES_BLOCK_SIZE];
            ciphertext.copy_from_slice(block);
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
            block.iter_mut().zip(previous.iter()).for_each(|(b, p)| *b ^= p);
            *previous = ciphertext;
        }
    }
}

fn hash_context_handle(id: u32) -> [u8; CONTEXT_HANDLE_SIZE] {
    let mut handle = [0u8; CONTEXT_HANDLE_SIZE];
    handle[..4].copy_from_slice(&HASH_CONTEXT_MAGIC);
    handle[4..].copy_from_slice(&id.to_be_bytes());
    handle
}

fn hash_context_id(handle: &[u8]) -> DeviceResult<u32> {
    match handle {
        [m0, m1, m2, m3, id @ ..] if [*m0, *m1, *m2, *m3] == HASH_CONTEXT_MAGIC && id.len() == 4 => {
            Ok(u32::from_be_bytes([id[0], id[1], id[2], id[3]]))
        }
        _ => Err(DeviceError::InvalidDataField),
    }
}
