// Licensed under the Apache-2.0 license

//! One non-blocking entry point per operation family
//!
//! Each wrapper builds the family's handler and queues it with
//! [`Engine::invoke`]; results arrive through the instance callback. Families
//! with many shapes (hashing, symmetric sequences, protected update) take a
//! prebuilt handler so every builder option stays available.

use se_host_command_types::{
    CloseMode, KeyDerivation, KeyType, KeyUsage, Oid, OpenMode, RandomType, SignatureScheme,
    SymKeyType, SymMode, WriteMode,
};
use se_host_commands::{
    AsymMessage, CalcHash, CalcSharedSecret, CalcSign, CloseApplication, DecryptAsym, DeriveKey,
    EncryptAsym, GenKeyPair, GenSymKey, GetRandom, KeyRef, KeyTarget, OpenApplication,
    PublicKeySource, ReadData, SecretTarget, SequenceStep, SetObjectProtected, SymCipher,
    VerifySign, WriteData,
};

use crate::{Engine, EngineResult, InstanceId};

impl Engine {
    /// Open the device application, optionally resuming a hibernated context
    pub fn open_application(&mut self, id: InstanceId, mode: OpenMode) -> EngineResult<()> {
        self.invoke(id, Box::new(OpenApplication::new(mode)))
    }

    /// Close the device application; hibernate persists the context handle
    /// and the secure channel session
    pub fn close_application(&mut self, id: InstanceId, mode: CloseMode) -> EngineResult<()> {
        self.invoke(id, Box::new(CloseApplication::new(mode)))
    }

    pub fn read_data(&mut self, id: InstanceId, oid: Oid, offset: u16, length: usize) -> EngineResult<()> {
        self.invoke(id, Box::new(ReadData::new(oid, offset, length)))
    }

    pub fn read_metadata(&mut self, id: InstanceId, oid: Oid) -> EngineResult<()> {
        self.invoke(id, Box::new(ReadData::metadata(oid)))
    }

    pub fn write_data(
        &mut self,
        id: InstanceId,
        oid: Oid,
        mode: WriteMode,
        offset: u16,
        data: Vec<u8>,
    ) -> EngineResult<()> {
        self.invoke(id, Box::new(WriteData::new(oid, mode, offset, data)))
    }

    pub fn write_metadata(&mut self, id: InstanceId, oid: Oid, metadata: Vec<u8>) -> EngineResult<()> {
        self.invoke(id, Box::new(WriteData::metadata(oid, metadata)))
    }

    pub fn get_random(&mut self, id: InstanceId, kind: RandomType, length: u16) -> EngineResult<()> {
        self.invoke(id, Box::new(GetRandom::new(kind, length)))
    }

    /// Random authorization code, kept in the instance's session for a later
    /// [`Engine::hmac_verify`]
    pub fn generate_auth_code(
        &mut self,
        id: InstanceId,
        kind: RandomType,
        optional_data: Vec<u8>,
        length: u16,
    ) -> EngineResult<()> {
        self.invoke(id, Box::new(GetRandom::auth_code(kind, optional_data, length)))
    }

    pub fn calc_hash(&mut self, id: InstanceId, hash: CalcHash) -> EngineResult<()> {
        self.invoke(id, Box::new(hash))
    }

    pub fn calc_sign(
        &mut self,
        id: InstanceId,
        scheme: SignatureScheme,
        key: KeyRef,
        digest: Vec<u8>,
    ) -> EngineResult<()> {
        self.invoke(id, Box::new(CalcSign::new(scheme, key, digest)))
    }

    pub fn verify_sign(
        &mut self,
        id: InstanceId,
        scheme: SignatureScheme,
        digest: Vec<u8>,
        signature: Vec<u8>,
        public_key: PublicKeySource,
    ) -> EngineResult<()> {
        self.invoke(
            id,
            Box::new(VerifySign::new(scheme, digest, signature, public_key)),
        )
    }

    pub fn calc_shared_secret(
        &mut self,
        id: InstanceId,
        private_key: KeyRef,
        key_type: KeyType,
        public_key: Vec<u8>,
        target: SecretTarget,
    ) -> EngineResult<()> {
        self.invoke(
            id,
            Box::new(CalcSharedSecret::new(private_key, key_type, public_key, target)),
        )
    }

    pub fn derive_key(&mut self, id: InstanceId, derive: DeriveKey) -> EngineResult<()> {
        self.invoke(id, Box::new(derive))
    }

    /// Shorthand for a TLS-PRF or HKDF derivation without HKDF info
    pub fn derive_key_from(
        &mut self,
        id: InstanceId,
        method: KeyDerivation,
        secret: KeyRef,
        derivation_data: Vec<u8>,
        key_length: u16,
        target: SecretTarget,
    ) -> EngineResult<()> {
        self.derive_key(
            id,
            DeriveKey::new(method, secret, derivation_data, key_length, target),
        )
    }

    pub fn gen_key_pair(
        &mut self,
        id: InstanceId,
        key_type: KeyType,
        usage: KeyUsage,
        target: KeyTarget,
    ) -> EngineResult<()> {
        self.invoke(id, Box::new(GenKeyPair::new(key_type, usage, target)))
    }

    pub fn gen_sym_key(
        &mut self,
        id: InstanceId,
        key_type: SymKeyType,
        usage: KeyUsage,
        target: KeyTarget,
    ) -> EngineResult<()> {
        self.invoke(id, Box::new(GenSymKey::new(key_type, usage, target)))
    }

    pub fn encrypt_asym(
        &mut self,
        id: InstanceId,
        message: AsymMessage,
        public_key: PublicKeySource,
    ) -> EngineResult<()> {
        self.invoke(id, Box::new(EncryptAsym::new(message, public_key)))
    }

    pub fn decrypt_asym(
        &mut self,
        id: InstanceId,
        ciphertext: Vec<u8>,
        private_key: Oid,
        target: SecretTarget,
    ) -> EngineResult<()> {
        self.invoke(id, Box::new(DecryptAsym::new(ciphertext, private_key, target)))
    }

    /// One step of a symmetric encrypt sequence
    ///
    /// `Start` and `Continue` keep the strict lock for the next step;
    /// `StartFinal` and `Final` release it.
    pub fn encrypt_sym(
        &mut self,
        id: InstanceId,
        mode: SymMode,
        step: SequenceStep,
        key: Oid,
        data: Vec<u8>,
    ) -> EngineResult<()> {
        self.invoke(id, Box::new(SymCipher::encrypt(mode, step, key, data)))
    }

    pub fn decrypt_sym(
        &mut self,
        id: InstanceId,
        mode: SymMode,
        step: SequenceStep,
        key: Oid,
        data: Vec<u8>,
    ) -> EngineResult<()> {
        self.invoke(id, Box::new(SymCipher::decrypt(mode, step, key, data)))
    }

    /// Symmetric step with IV, associated data or total length attached
    pub fn sym_cipher(&mut self, id: InstanceId, cipher: SymCipher) -> EngineResult<()> {
        self.invoke(id, Box::new(cipher))
    }

    pub fn hmac(
        &mut self,
        id: InstanceId,
        mode: SymMode,
        step: SequenceStep,
        key: KeyRef,
        data: Vec<u8>,
    ) -> EngineResult<()> {
        self.invoke(id, Box::new(SymCipher::hmac(mode, step, key, data)))
    }

    /// Verify `expected` against the HMAC of `data`, authorizing `secret`
    ///
    /// Needs the session holding an auth code from
    /// [`Engine::generate_auth_code`]; the session is returned to the pool
    /// afterwards.
    pub fn hmac_verify(
        &mut self,
        id: InstanceId,
        mode: SymMode,
        secret: Oid,
        data: Vec<u8>,
        expected: Vec<u8>,
    ) -> EngineResult<()> {
        self.invoke(
            id,
            Box::new(SymCipher::hmac_verify(mode, secret, data, expected)),
        )
    }

    pub fn clear_auto_state(&mut self, id: InstanceId, secret: Oid) -> EngineResult<()> {
        self.invoke(id, Box::new(SymCipher::clear_auto_state(secret)))
    }

    /// One step of a protected data object update
    pub fn set_object_protected(&mut self, id: InstanceId, update: SetObjectProtected) -> EngineResult<()> {
        self.invoke(id, Box::new(update))
    }
}
