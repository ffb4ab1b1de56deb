// Licensed under the Apache-2.0 license

//! Hash calculation
//!
//! The host owns the intermediate hash context between calls. A call that
//! carries more data than one APDU holds is split into start / continue /
//! final rounds; the device keeps its context across those rounds and the
//! context is only exchanged on the first and last round.

use alloc::vec::Vec;
use se_host_command_types::{
    ApduCommand, CommandError, CommandResult, HashAlgorithm, HashSequence, HASH_TAG_CONTEXT_OUT,
    HASH_TAG_DIGEST, HASH_TAG_INTERMEDIATE_CONTEXT, TLV_HEADER_SIZE,
};

use super::{apdu_buf, chunk_capacity, CommandHandler, CommandOutput, ExecContext, Progress};
use crate::packing::{ApduResponse, ApduWriter};

#[derive(Debug, Clone)]
pub struct CalcHash {
    algorithm: HashAlgorithm,
    sequence: HashSequence,
    data: Vec<u8>,
    context: Option<Vec<u8>>,
    export_context: bool,
    sent: usize,
    in_flight: usize,
    output: Vec<u8>,
}

impl CalcHash {
    fn new(
        sequence: HashSequence,
        data: Vec<u8>,
        context: Option<Vec<u8>>,
        export_context: bool,
    ) -> Self {
        Self {
            algorithm: HashAlgorithm::Sha256,
            sequence,
            data,
            context,
            export_context,
            sent: 0,
            in_flight: 0,
            output: Vec::new(),
        }
    }

    /// Begin a hash; completes with the initial context
    pub fn start() -> Self {
        Self::new(HashSequence::Start, Vec::new(), None, true)
    }

    /// Feed `data` into `context`; completes with the updated context
    pub fn update(context: Vec<u8>, data: Vec<u8>) -> Self {
        Self::new(HashSequence::Continue, data, Some(context), true)
    }

    /// Finish `context`; completes with the digest
    pub fn finalize(context: Vec<u8>) -> Self {
        Self::new(HashSequence::Final, Vec::new(), Some(context), false)
    }

    /// Hash a complete message; completes with the digest
    pub fn digest(data: Vec<u8>) -> Self {
        Self::new(HashSequence::StartFinal, data, None, false)
    }

    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    fn round_sequence(&self, first: bool, last: bool) -> HashSequence {
        use HashSequence::*;
        match (first, last) {
            (true, true) => self.sequence,
            (true, false) => match self.sequence {
                StartFinal | Start => Start,
                Continue | Final => Continue,
            },
            (false, false) => Continue,
            (false, true) => match self.sequence {
                StartFinal | Final => Final,
                Start | Continue => Continue,
            },
        }
    }

    fn chaining(&self) -> bool {
        self.sent < self.data.len()
    }
}

impl CommandHandler for CalcHash {
    fn command(&self) -> ApduCommand {
        ApduCommand::CalcHash
    }

    fn prepare(&mut self, ctx: &ExecContext, buf: &mut [u8]) -> CommandResult<usize> {
        let first = self.sent == 0;
        let context_in = if first { self.context.as_deref() } else { None };

        let mut overhead = TLV_HEADER_SIZE;
        if let Some(context) = context_in {
            overhead += TLV_HEADER_SIZE + context.len();
        }
        if self.export_context {
            overhead += TLV_HEADER_SIZE;
        }
        let capacity = chunk_capacity(ctx, overhead)?;
        let remaining = self.data.len() - self.sent;
        self.in_flight = remaining.min(capacity);
        let last = self.in_flight == remaining;
        let sequence = self.round_sequence(first, last);

        let mut w = ApduWriter::new(apdu_buf(ctx, buf))?;
        w.put_tlv(sequence as u8, &self.data[self.sent..self.sent + self.in_flight])?;
        if let Some(context) = context_in {
            w.put_tlv(HASH_TAG_INTERMEDIATE_CONTEXT, context)?;
        }
        if self.export_context && last {
            w.put_tl(HASH_TAG_CONTEXT_OUT, 0)?;
        }
        w.finish(self.command().code(), self.algorithm as u8)
    }

    fn process(&mut self, _ctx: &ExecContext, response: &ApduResponse<'_>) -> CommandResult<Progress> {
        self.sent += self.in_flight;
        self.in_flight = 0;
        if self.chaining() {
            return Ok(Progress::Chain);
        }
        if self.sequence.is_final() {
            let digest = response.expect_tlv(HASH_TAG_DIGEST)?;
            if digest.len() != self.algorithm.digest_size() {
                return Err(CommandError::InvalidResponseLength);
            }
            self.output = digest.to_vec();
        } else if self.export_context {
            self.output = response.expect_tlv(HASH_TAG_INTERMEDIATE_CONTEXT)?.to_vec();
        }
        Ok(Progress::Done)
    }

    fn take_output(&mut self) -> CommandOutput {
        CommandOutput::Data(core::mem::take(&mut self.output))
    }
}
