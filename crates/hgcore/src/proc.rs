//! # Payload Procs
//!
//! Engine-owned encodings: the length-prefixed string used for every RPC
//! input and output, and a small little-endian writer/reader pair used for
//! bulk descriptor serialization.

use crate::ret::HgResult;
use crate::ret::HgReturn;

/// Largest payload a single RPC may carry.
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Encodes a byte string as `u64 length || bytes`.
pub fn encode_string(payload: &[u8]) -> HgResult<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(HgReturn::MsgSize);
    }
    let mut w = Writer::with_capacity(payload.len() + 8);
    w.bytes(payload);
    Ok(w.finish())
}

/// Decodes a string produced by [`encode_string`]. Trailing bytes are an error.
pub fn decode_string(raw: &[u8]) -> HgResult<Vec<u8>> {
    let mut r = Reader::new(raw);
    let bytes = r.bytes()?.to_vec();
    r.finish()?;
    Ok(bytes)
}

pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap) }
    }

    pub(crate) fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn raw(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub(crate) fn bytes(&mut self, v: &[u8]) {
        self.u64(v.len() as u64);
        self.raw(v);
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> HgResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(HgReturn::Protocol)?;
        let slice = self.buf.get(self.pos..end).ok_or(HgReturn::Protocol)?;
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> HgResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u64(&mut self) -> HgResult<u64> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(arr))
    }

    pub(crate) fn raw(&mut self, n: usize) -> HgResult<&'a [u8]> {
        self.take(n)
    }

    pub(crate) fn bytes(&mut self) -> HgResult<&'a [u8]> {
        let len = usize::try_from(self.u64()?).map_err(|_| HgReturn::Protocol)?;
        if len > MAX_PAYLOAD {
            return Err(HgReturn::Protocol);
        }
        self.take(len)
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn finish(self) -> HgResult<()> {
        if self.pos == self.buf.len() { Ok(()) } else { Err(HgReturn::Protocol) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_proc_rejects_truncation() {
        let enc = encode_string(b"hello").unwrap();
        assert_eq!(decode_string(&enc).unwrap(), b"hello");
        assert_eq!(decode_string(&enc[..enc.len() - 1]), Err(HgReturn::Protocol));
        assert_eq!(decode_string(&enc[..3]), Err(HgReturn::Protocol));
    }

    #[test]
    fn test_string_proc_rejects_trailing_bytes() {
        let mut enc = encode_string(b"").unwrap();
        enc.push(0);
        assert_eq!(decode_string(&enc), Err(HgReturn::Protocol));
    }

    #[test]
    fn test_string_proc_rejects_absurd_length() {
        let mut w = Writer::with_capacity(8);
        w.u64(u64::MAX);
        assert_eq!(decode_string(&w.finish()), Err(HgReturn::Protocol));
    }
}
