// Licensed under the Apache-2.0 license

//! Data objects of the simulated device

use std::collections::{BTreeMap, BTreeSet};

use se_host_command_types::{
    DeviceError, Oid, WriteMode, OID_COPROCESSOR_UID, OID_DATA_OBJECT_BASE,
    OID_DEVICE_CERTIFICATE, OID_PLATFORM_BINDING_SECRET,
};

/// Largest data object the device stores
pub const MAX_OBJECT_SIZE: usize = 1700;

/// HMAC secret used to authorize [`OID_PROTECTED_DATA`]
pub const OID_AUTH_SECRET: Oid = OID_DATA_OBJECT_BASE;

/// Readable only while [`OID_AUTH_SECRET`] is authorized
pub const OID_PROTECTED_DATA: Oid = 0xF1DB;

/// Initial contents of [`OID_AUTH_SECRET`]
pub const DEFAULT_AUTH_SECRET: [u8; 32] = [0x5C; 32];

const METADATA_TAG: u8 = 0x20;
const METADATA_USED_SIZE_TAG: u8 = 0xC5;

const ARBITRARY_DATA: core::ops::RangeInclusive<Oid> = 0xF1D0..=0xF1DF;
const PUBLIC_KEY_CERTIFICATES: core::ops::RangeInclusive<Oid> = 0xE0E1..=0xE0E3;

#[derive(Debug, Clone, Default)]
pub struct DataObject {
    pub data: Vec<u8>,
    /// Written metadata; derived from the used size when absent
    metadata: Option<Vec<u8>>,
    read_only: bool,
    /// Object whose authorization gates reads
    read_requires: Option<Oid>,
}

impl DataObject {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn gated_by(mut self, oid: Oid) -> Self {
        self.read_requires = Some(oid);
        self
    }

    pub fn metadata(&self) -> Vec<u8> {
        match &self.metadata {
            Some(metadata) => metadata.clone(),
            None => {
                let used = (self.data.len() as u16).to_be_bytes();
                vec![METADATA_TAG, 0x04, METADATA_USED_SIZE_TAG, 0x02, used[0], used[1]]
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObjectStore {
    objects: BTreeMap<Oid, DataObject>,
}

impl ObjectStore {
    /// Factory contents: identity, certificate, binding and auth secrets
    pub fn provision(uid: &[u8], certificate: &[u8], binding_secret: &[u8]) -> Self {
        let mut objects = BTreeMap::new();
        objects.insert(OID_COPROCESSOR_UID, DataObject::new(uid.to_vec()).read_only());
        objects.insert(OID_DEVICE_CERTIFICATE, DataObject::new(certificate.to_vec()));
        objects.insert(OID_PLATFORM_BINDING_SECRET, DataObject::new(binding_secret.to_vec()));
        objects.insert(OID_AUTH_SECRET, DataObject::new(DEFAULT_AUTH_SECRET.to_vec()));
        objects.insert(
            OID_PROTECTED_DATA,
            DataObject::new(b"authorized read".to_vec()).gated_by(OID_AUTH_SECRET),
        );
        Self { objects }
    }

    pub fn get(&self, oid: Oid) -> Result<&DataObject, DeviceError> {
        self.objects.get(&oid).ok_or(DeviceError::InvalidOid)
    }

    pub fn read(
        &self,
        oid: Oid,
        offset: u16,
        length: u16,
        authorized: &BTreeSet<Oid>,
    ) -> Result<Vec<u8>, DeviceError> {
        let object = self.get(oid)?;
        if let Some(gate) = object.read_requires {
            if !authorized.contains(&gate) {
                return Err(DeviceError::AccessConditionNotSatisfied);
            }
        }
        let offset = offset as usize;
        if offset >= object.data.len() {
            return Err(DeviceError::DataObjectBoundaryExceeded);
        }
        let end = (offset + length as usize).min(object.data.len());
        Ok(object.data[offset..end].to_vec())
    }

    pub fn read_metadata(&self, oid: Oid) -> Result<Vec<u8>, DeviceError> {
        Ok(self.get(oid)?.metadata())
    }

    pub fn write(
        &mut self,
        oid: Oid,
        mode: WriteMode,
        offset: u16,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let object = self.writable(oid)?;
        if mode == WriteMode::Metadata {
            object.metadata = Some(data.to_vec());
            return Ok(());
        }

        let offset = offset as usize;
        let end = offset + data.len();
        if end > MAX_OBJECT_SIZE {
            return Err(DeviceError::DataObjectBoundaryExceeded);
        }
        if mode == WriteMode::EraseAndWrite {
            object.data.clear();
        }
        if object.data.len() < end {
            object.data.resize(end, 0);
        }
        object.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Replace the whole object, as a committed protected update does
    pub fn replace(&mut self, oid: Oid, data: Vec<u8>) -> Result<(), DeviceError> {
        if data.len() > MAX_OBJECT_SIZE {
            return Err(DeviceError::DataObjectBoundaryExceeded);
        }
        self.writable(oid)?.data = data;
        Ok(())
    }

    /// Check that `oid` accepts writes without changing it
    pub fn check_writable(&mut self, oid: Oid) -> Result<(), DeviceError> {
        self.writable(oid).map(|_| ())
    }

    fn writable(&mut self, oid: Oid) -> Result<&mut DataObject, DeviceError> {
        if !self.objects.contains_key(&oid) {
            if !(ARBITRARY_DATA.contains(&oid) || PUBLIC_KEY_CERTIFICATES.contains(&oid)) {
                return Err(DeviceError::InvalidOid);
            }
            self.objects.insert(oid, DataObject::default());
        }
        let object = self.objects.get_mut(&oid).ok_or(DeviceError::InvalidOid)?;
        if object.read_only {
            return Err(DeviceError::AccessConditionNotSatisfied);
        }
        Ok(object)
    }
}
