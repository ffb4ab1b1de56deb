// Licensed under the Apache-2.0 license

//! Command Packing and Unpacking
//!
//! Every request is composed through an [`ApduWriter`], which tracks its
//! position and fails with [`CommandError::BufferTooSmall`] instead of
//! writing past the shared buffer. Responses are walked with an
//! [`ApduReader`].

use se_host_command_types::{
    ApduHeader, CommandError, CommandResult, ResponseHeader, APDU_HEADER_SIZE, TLV_HEADER_SIZE,
};
use zerocopy::{FromBytes, IntoBytes};

/// Cursor over a request buffer; the APDU header is written last
pub struct ApduWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ApduWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> CommandResult<Self> {
        if buf.len() < APDU_HEADER_SIZE {
            return Err(CommandError::BufferTooSmall);
        }
        Ok(Self {
            buf,
            pos: APDU_HEADER_SIZE,
        })
    }

    /// Bytes still available for payload
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn payload_len(&self) -> usize {
        self.pos - APDU_HEADER_SIZE
    }

    fn reserve(&mut self, len: usize) -> CommandResult<&mut [u8]> {
        if len > self.remaining() {
            return Err(CommandError::BufferTooSmall);
        }
        let start = self.pos;
        self.pos += len;
        Ok(&mut self.buf[start..self.pos])
    }

    pub fn put_u8(&mut self, value: u8) -> CommandResult<()> {
        self.reserve(1)?[0] = value;
        Ok(())
    }

    pub fn put_u16(&mut self, value: u16) -> CommandResult<()> {
        self.reserve(2)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn put_bytes(&mut self, data: &[u8]) -> CommandResult<()> {
        self.reserve(data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Tag and length only; the value follows separately
    pub fn put_tl(&mut self, tag: u8, len: usize) -> CommandResult<()> {
        let len = u16::try_from(len).map_err(|_| CommandError::BufferTooSmall)?;
        self.put_u8(tag)?;
        self.put_u16(len)
    }

    pub fn put_tlv(&mut self, tag: u8, value: &[u8]) -> CommandResult<()> {
        if TLV_HEADER_SIZE + value.len() > self.remaining() {
            return Err(CommandError::BufferTooSmall);
        }
        self.put_tl(tag, value.len())?;
        self.put_bytes(value)
    }

    pub fn put_tlv_u8(&mut self, tag: u8, value: u8) -> CommandResult<()> {
        self.put_tlv(tag, &[value])
    }

    pub fn put_tlv_u16(&mut self, tag: u8, value: u16) -> CommandResult<()> {
        self.put_tlv(tag, &value.to_be_bytes())
    }

    /// Write the header and return the total APDU length
    pub fn finish(self, cmd: u8, param: u8) -> CommandResult<usize> {
        let len =
            u16::try_from(self.payload_len()).map_err(|_| CommandError::BufferTooSmall)?;
        ApduHeader::new(cmd, param, len)
            .write_to_prefix(self.buf)
            .map_err(|_| CommandError::BufferTooSmall)?;
        Ok(self.pos)
    }
}

/// Cursor over a response payload
pub struct ApduReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ApduReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn get_bytes(&mut self, len: usize) -> CommandResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(CommandError::InvalidResponseLength);
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..self.pos])
    }

    pub fn get_u8(&mut self) -> CommandResult<u8> {
        Ok(self.get_bytes(1)?[0])
    }

    pub fn get_u16(&mut self) -> CommandResult<u16> {
        let bytes = self.get_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn get_tlv(&mut self) -> CommandResult<(u8, &'a [u8])> {
        let tag = self.get_u8()?;
        let len = self.get_u16()? as usize;
        Ok((tag, self.get_bytes(len)?))
    }
}

/// Parsed response APDU
#[derive(Debug, Clone, Copy)]
pub struct ApduResponse<'a> {
    pub status: u8,
    pub payload: &'a [u8],
}

impl<'a> ApduResponse<'a> {
    pub fn is_success(&self) -> bool {
        self.status == se_host_command_types::APDU_SUCCESS
    }

    pub fn reader(&self) -> ApduReader<'a> {
        ApduReader::new(self.payload)
    }

    /// First TLV in the payload, which must carry `tag`
    pub fn expect_tlv(&self, tag: u8) -> CommandResult<&'a [u8]> {
        let (found, value) = self.reader().get_tlv()?;
        if found != tag {
            return Err(CommandError::InvalidResponse);
        }
        Ok(value)
    }

    /// Any TLV in the payload carrying `tag`
    pub fn find_tlv(&self, tag: u8) -> CommandResult<Option<&'a [u8]>> {
        let mut reader = self.reader();
        while !reader.is_empty() {
            let (found, value) = reader.get_tlv()?;
            if found == tag {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

/// Split a response frame into status and payload
pub fn parse_response(frame: &[u8]) -> CommandResult<ApduResponse<'_>> {
    let (header, rest) =
        ResponseHeader::read_from_prefix(frame).map_err(|_| CommandError::InvalidResponseLength)?;
    let len = header.len.get() as usize;
    if len > rest.len() {
        return Err(CommandError::InvalidResponseLength);
    }
    Ok(ApduResponse {
        status: header.status,
        payload: &rest[..len],
    })
}

/// Frame a response APDU, used by device-side peers
pub fn write_response(status: u8, payload: &[u8], out: &mut [u8]) -> CommandResult<usize> {
    let total = APDU_HEADER_SIZE + payload.len();
    let len = u16::try_from(payload.len()).map_err(|_| CommandError::BufferTooSmall)?;
    if out.len() < total {
        return Err(CommandError::BufferTooSmall);
    }
    out[..APDU_HEADER_SIZE].copy_from_slice(ResponseHeader::new(status, len).as_bytes());
    out[APDU_HEADER_SIZE..total].copy_from_slice(payload);
    Ok(total)
}
