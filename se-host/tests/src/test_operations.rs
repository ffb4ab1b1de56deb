// Licensed under the Apache-2.0 license

//! Operation families end to end against the simulated device

use hmac::{Hmac, Mac};
use p384::ecdsa::signature::hazmat::PrehashVerifier;
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use p384::PublicKey;
use rand::rngs::StdRng;
use rand::SeedableRng;
use se_host::command_types::OID_DEVICE_CERTIFICATE;
use se_host::{
    CalcHash, CommandOutput, DeviceError, EngineConfig, EngineError, KeyRef, KeyTarget, KeyType,
    KeyUsage, Protection, PublicKeySource, RandomType, SecretTarget, SequenceStep,
    SetObjectProtected, SignatureScheme, SymCipher, SymKeyType, SymMode, WriteMode,
};
use se_host_sim_device::{
    DEFAULT_AUTH_SECRET, OID_AUTH_SECRET, OID_DEVICE_KEY, OID_PROTECTED_DATA, OID_SYM_KEY,
};
use sha2::{Digest, Sha256, Sha384};

use crate::common::{last_data, TestBed};

fn auth_mac(data: &[u8]) -> Vec<u8> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&DEFAULT_AUTH_SECRET).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn device_public_key(bed: &TestBed) -> PublicKey {
    let certificate = bed.device().object(OID_DEVICE_CERTIFICATE).unwrap();
    PublicKey::from_sec1_bytes(&certificate).unwrap()
}

#[test]
fn test_streamed_hash_matches_one_shot() {
    println!("Testing streamed hash matches one shot...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    let message: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

    bed.engine.calc_hash(id, CalcHash::digest(message.clone())).unwrap();
    bed.run();
    let one_shot = last_data(&results);

    bed.engine.calc_hash(id, CalcHash::start()).unwrap();
    bed.run();
    let mut context = last_data(&results);
    for chunk in message.chunks(1100) {
        bed.engine
            .calc_hash(id, CalcHash::update(context, chunk.to_vec()))
            .unwrap();
        bed.run();
        context = last_data(&results);
    }
    bed.engine.calc_hash(id, CalcHash::finalize(context)).unwrap();
    bed.run();

    assert_eq!(one_shot, Sha256::digest(&message).to_vec());
    assert_eq!(last_data(&results), one_shot);
}

#[test]
fn test_sign_with_device_key() {
    println!("Testing sign with device key...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    let digest = Sha384::digest(b"firmware manifest").to_vec();

    bed.engine
        .calc_sign(id, SignatureScheme::Ecdsa, KeyRef::Oid(OID_DEVICE_KEY), digest.clone())
        .unwrap();
    bed.run();
    let signature = last_data(&results);
    assert_eq!(signature.len(), 96);

    let certificate = bed.device().object(OID_DEVICE_CERTIFICATE).unwrap();
    let verifying_key = VerifyingKey::from_sec1_bytes(&certificate).unwrap();
    let parsed = Signature::from_slice(&signature).unwrap();
    assert!(verifying_key.verify_prehash(&digest, &parsed).is_ok());

    bed.engine
        .verify_sign(
            id,
            SignatureScheme::Ecdsa,
            digest.clone(),
            signature.clone(),
            PublicKeySource::Certificate(OID_DEVICE_CERTIFICATE),
        )
        .unwrap();
    bed.run();
    let mut tampered = digest;
    tampered[0] ^= 0xFF;
    bed.engine
        .verify_sign(
            id,
            SignatureScheme::Ecdsa,
            tampered,
            signature,
            PublicKeySource::Certificate(OID_DEVICE_CERTIFICATE),
        )
        .unwrap();
    bed.run();

    let results = results.lock().unwrap();
    assert_eq!(results[1], Ok(CommandOutput::Empty));
    assert_eq!(
        results[2],
        Err(EngineError::Device(DeviceError::SignatureVerificationFailure))
    );
}

#[test]
fn test_generated_key_signs_and_verifies() {
    println!("Testing generated key signs and verifies...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    bed.engine
        .gen_key_pair(id, KeyType::EccNistP384, KeyUsage::SIGN, KeyTarget::Oid(0xE0F1))
        .unwrap();
    bed.run();
    let public_key = match results.lock().unwrap().last() {
        Some(Ok(CommandOutput::KeyPair {
            public_key,
            private_key: None,
        })) => public_key.clone(),
        other => panic!("expected a stored key pair, got {:?}", other),
    };

    let digest = Sha384::digest(b"generated").to_vec();
    bed.engine
        .calc_sign(id, SignatureScheme::Ecdsa, KeyRef::Oid(0xE0F1), digest.clone())
        .unwrap();
    bed.run();
    let signature = last_data(&results);

    bed.engine
        .verify_sign(
            id,
            SignatureScheme::Ecdsa,
            digest,
            signature,
            PublicKeySource::Key {
                key_type: KeyType::EccNistP384,
                public_key,
            },
        )
        .unwrap();
    bed.run();
    assert_eq!(results.lock().unwrap()[2], Ok(CommandOutput::Empty));
}

#[test]
fn test_exported_key_pair_is_consistent() {
    println!("Testing exported key pair is consistent...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    bed.engine
        .gen_key_pair(id, KeyType::EccNistP384, KeyUsage::AUTHENTICATION, KeyTarget::Export)
        .unwrap();
    bed.run();

    let results = results.lock().unwrap();
    let Some(Ok(CommandOutput::KeyPair {
        public_key,
        private_key: Some(private_key),
    })) = results.last()
    else {
        panic!("expected an exported key pair, got {:?}", results.last());
    };
    let key = SigningKey::from_slice(private_key).unwrap();
    assert_eq!(
        key.verifying_key().to_encoded_point(false).as_bytes(),
        public_key.as_slice()
    );
}

#[test]
fn test_ecdh_matches_host_computation() {
    println!("Testing ecdh matches host computation...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    let peer = SigningKey::random(&mut StdRng::seed_from_u64(42));
    let peer_public = peer.verifying_key().to_encoded_point(false).as_bytes().to_vec();

    bed.engine
        .calc_shared_secret(
            id,
            KeyRef::Oid(OID_DEVICE_KEY),
            KeyType::EccNistP384,
            peer_public,
            SecretTarget::Export,
        )
        .unwrap();
    bed.run();

    let expected =
        p384::ecdh::diffie_hellman(peer.as_nonzero_scalar(), device_public_key(&bed).as_affine());
    assert_eq!(last_data(&results), expected.raw_secret_bytes().to_vec());
}

#[test]
fn test_hmac_over_chained_rounds() {
    println!("Testing hmac over chained rounds...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    let message = vec![0x3C; 1000];

    bed.engine
        .hmac(
            id,
            SymMode::HmacSha256,
            SequenceStep::StartFinal,
            KeyRef::Oid(OID_AUTH_SECRET),
            message.clone(),
        )
        .unwrap();
    bed.run();
    assert_eq!(last_data(&results), auth_mac(&message));
}

#[test]
fn test_authorization_cleared() {
    println!("Testing authorization cleared...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();

    bed.engine
        .generate_auth_code(id, RandomType::Trng, Vec::new(), 16)
        .unwrap();
    bed.run();
    let mut data = last_data(&results);
    data.extend_from_slice(b"challenge");
    let mac = auth_mac(&data);
    bed.engine
        .hmac_verify(id, SymMode::HmacSha256, OID_AUTH_SECRET, data, mac)
        .unwrap();
    bed.run();
    bed.engine.read_data(id, OID_PROTECTED_DATA, 0, 64).unwrap();
    bed.run();
    assert_eq!(last_data(&results), b"authorized read".to_vec());

    // Clearing needs a session again
    bed.engine
        .generate_auth_code(id, RandomType::Trng, Vec::new(), 16)
        .unwrap();
    bed.run();
    bed.engine.clear_auto_state(id, OID_AUTH_SECRET).unwrap();
    bed.run();
    assert_eq!(bed.engine.session_of(id), None);
    bed.engine.read_data(id, OID_PROTECTED_DATA, 0, 64).unwrap();
    bed.run();

    let results = results.lock().unwrap();
    assert_eq!(results[4], Ok(CommandOutput::Empty));
    assert_eq!(
        results[5],
        Err(EngineError::Device(DeviceError::AccessConditionNotSatisfied))
    );
}

#[test]
fn test_protected_update_commits_target() {
    println!("Testing protected update commits target...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();

    bed.engine
        .set_object_protected(id, SetObjectProtected::start(vec![0xF1, 0xD9, 0x00, 0x01]))
        .unwrap();
    bed.run();
    bed.engine
        .set_object_protected(id, SetObjectProtected::fragment(b"hello ".to_vec()))
        .unwrap();
    bed.run();
    assert_eq!(bed.device().object(0xF1D9), None);
    bed.engine
        .set_object_protected(id, SetObjectProtected::last_fragment(b"world".to_vec()))
        .unwrap();
    bed.run();
    assert!(!bed.engine.queue_snapshot()[id.index()].holds_strict_lock());

    bed.engine.read_data(id, 0xF1D9, 0, 64).unwrap();
    bed.run();
    assert!(results.lock().unwrap().iter().all(Result::is_ok));
    assert_eq!(last_data(&results), b"hello world".to_vec());
}

#[test]
fn test_cbc_streamed_matches_one_shot() {
    println!("Testing cbc streamed matches one shot...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    let iv = vec![0x11; 16];
    let plaintext: Vec<u8> = (0..64u8).collect();

    bed.engine
        .sym_cipher(
            id,
            SymCipher::encrypt(SymMode::Cbc, SequenceStep::StartFinal, OID_SYM_KEY, plaintext.clone())
                .with_iv(iv.clone()),
        )
        .unwrap();
    bed.run();
    let one_shot = last_data(&results);
    assert_eq!(one_shot.len(), plaintext.len());
    assert_ne!(one_shot, plaintext);

    bed.engine
        .sym_cipher(
            id,
            SymCipher::encrypt(SymMode::Cbc, SequenceStep::Start, OID_SYM_KEY, plaintext[..32].to_vec())
                .with_iv(iv.clone()),
        )
        .unwrap();
    bed.run();
    let mut streamed = last_data(&results);
    assert!(bed.engine.queue_snapshot()[id.index()].holds_strict_lock());
    bed.engine
        .encrypt_sym(id, SymMode::Cbc, SequenceStep::Final, OID_SYM_KEY, plaintext[32..].to_vec())
        .unwrap();
    bed.run();
    streamed.extend_from_slice(&last_data(&results));
    assert_eq!(streamed, one_shot);

    bed.engine
        .sym_cipher(
            id,
            SymCipher::decrypt(SymMode::Cbc, SequenceStep::StartFinal, OID_SYM_KEY, one_shot)
                .with_iv(iv),
        )
        .unwrap();
    bed.run();
    assert_eq!(last_data(&results), plaintext);
}

#[test]
fn test_generated_sym_key_replaces_stored_key() {
    println!("Testing generated sym key replaces stored key...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    let iv = vec![0x22; 16];
    let plaintext = vec![0x5A; 32];
    let encrypt = |plaintext: &[u8]| {
        SymCipher::encrypt(SymMode::Cbc, SequenceStep::StartFinal, OID_SYM_KEY, plaintext.to_vec())
            .with_iv(iv.clone())
    };

    for _ in 0..2 {
        bed.engine
            .gen_sym_key(id, SymKeyType::Aes128, KeyUsage::ENCRYPTION, KeyTarget::Export)
            .unwrap();
        bed.run();
    }
    let exported: Vec<Vec<u8>> = results
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.clone().unwrap().into_data().unwrap())
        .collect();
    assert_eq!(exported[0].len(), 16);
    assert_ne!(exported[0], exported[1]);

    bed.engine.sym_cipher(id, encrypt(&plaintext)).unwrap();
    bed.run();
    let before = last_data(&results);

    bed.engine
        .gen_sym_key(
            id,
            SymKeyType::Aes128,
            KeyUsage::ENCRYPTION,
            KeyTarget::Oid(OID_SYM_KEY),
        )
        .unwrap();
    bed.run();
    bed.engine.sym_cipher(id, encrypt(&plaintext)).unwrap();
    bed.run();
    let after = last_data(&results);
    assert_ne!(after, before);

    bed.engine
        .sym_cipher(
            id,
            SymCipher::decrypt(SymMode::Cbc, SequenceStep::StartFinal, OID_SYM_KEY, after)
                .with_iv(iv.clone()),
        )
        .unwrap();
    bed.run();
    assert_eq!(last_data(&results), plaintext);
    assert!(results.lock().unwrap().iter().all(Result::is_ok));
}

#[test]
fn test_chained_object_transfer_over_secure_channel() {
    println!("Testing chained object transfer over secure channel...");
    let config = EngineConfig::new().with_comms_buffer_size(256);
    let mut bed = TestBed::with_config(config);
    let (id, results) = bed.instance();
    bed.engine.set_protection(id, Protection::Full, false).unwrap();
    let data: Vec<u8> = (0..1500u32).map(|i| (i * 7) as u8).collect();

    bed.engine
        .write_data(id, 0xF1D8, WriteMode::EraseAndWrite, 0, data.clone())
        .unwrap();
    bed.run();
    let writes = bed.device().statistics().commands;
    assert!(writes > 1);

    bed.engine.read_data(id, 0xF1D8, 0, 1700).unwrap();
    bed.run();

    assert_eq!(last_data(&results), data);
    let stats = bed.engine.statistics();
    assert_eq!(stats.channel.handshakes, 1);
    assert_eq!(stats.channel.records_sent, bed.device().statistics().commands);
    assert!(stats.commands_dispatched >= 2);
}
