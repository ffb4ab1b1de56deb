// Licensed under the Apache-2.0 license

//! Protected data object update
//!
//! The manifest goes out with the start step, each encrypted fragment with a
//! continue step, and the last fragment with the final step. The device
//! verifies the manifest signature and fragment digests itself; the host only
//! frames the stages and keeps the strict lock between them.

use alloc::vec::Vec;
use se_host_command_types::{
    ApduCommand, CommandError, CommandResult, UpdateStage, MANIFEST_VERSION_1,
};

use super::{
    apdu_buf, CommandHandler, ExecContext, LockKind, Progress, SequenceStep, StrictSequence,
};
use crate::packing::{ApduResponse, ApduWriter};

#[derive(Debug, Clone)]
pub struct SetObjectProtected {
    stage: UpdateStage,
    manifest_version: u8,
    data: Option<Vec<u8>>,
}

impl SetObjectProtected {
    pub fn new(stage: UpdateStage, data: Vec<u8>) -> Self {
        Self {
            stage,
            manifest_version: MANIFEST_VERSION_1,
            data: Some(data),
        }
    }

    pub fn start(manifest: Vec<u8>) -> Self {
        Self::new(UpdateStage::Start, manifest)
    }

    pub fn fragment(fragment: Vec<u8>) -> Self {
        Self::new(UpdateStage::Continue, fragment)
    }

    pub fn last_fragment(fragment: Vec<u8>) -> Self {
        Self::new(UpdateStage::Final, fragment)
    }

    /// End an update sequence early, releasing the strict lock
    pub fn abort() -> Self {
        Self {
            stage: UpdateStage::Final,
            manifest_version: MANIFEST_VERSION_1,
            data: None,
        }
    }

    pub fn with_manifest_version(mut self, version: u8) -> Self {
        self.manifest_version = version;
        self
    }

    fn step(&self) -> SequenceStep {
        match self.stage {
            UpdateStage::Start => SequenceStep::Start,
            UpdateStage::Continue => SequenceStep::Continue,
            UpdateStage::Final => SequenceStep::Final,
        }
    }
}

impl CommandHandler for SetObjectProtected {
    fn command(&self) -> ApduCommand {
        ApduCommand::SetObjectProtected
    }

    fn lock_kind(&self) -> LockKind {
        LockKind::StrictLock
    }

    fn strict_sequence(&self) -> Option<StrictSequence> {
        Some(StrictSequence {
            command: ApduCommand::SetObjectProtected,
            mode: 0,
            step: self.step(),
        })
    }

    fn release_only(&self) -> bool {
        self.data.is_none()
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        let data = self.data.as_deref().ok_or(CommandError::InvalidRequest)?;
        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        w.put_tlv(self.stage.tag(), data)?;
        w.finish(self.command().code(), self.manifest_version)
    }

    fn process(&mut self, _ctx: &ExecContext, _response: &ApduResponse<'_>) -> CommandResult<Progress> {
        match self.stage {
            UpdateStage::Final => Ok(Progress::Done),
            UpdateStage::Start | UpdateStage::Continue => Ok(Progress::Hold),
        }
    }
}
