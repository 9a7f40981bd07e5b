//! RFC 4254 message-type constants and the encode/decode helpers for each
//! message this engine speaks. Integers are big-endian; strings are
//! `u32` length || bytes, per [`crate::buffer`] and [`crate::reader`].

use crate::buffer::ByteBuffer;
use crate::error::Result;
use crate::reader::{ByteReader, WireStr};

pub const SSH_MSG_GLOBAL_REQUEST: u8 = 80;
pub const SSH_MSG_REQUEST_SUCCESS: u8 = 81;
pub const SSH_MSG_REQUEST_FAILURE: u8 = 82;
pub const SSH_MSG_CHANNEL_OPEN: u8 = 90;
pub const SSH_MSG_CHANNEL_OPEN_CONFIRMATION: u8 = 91;
pub const SSH_MSG_CHANNEL_OPEN_FAILURE: u8 = 92;
pub const SSH_MSG_CHANNEL_WINDOW_ADJUST: u8 = 93;
pub const SSH_MSG_CHANNEL_DATA: u8 = 94;
pub const SSH_MSG_CHANNEL_EXTENDED_DATA: u8 = 95;
pub const SSH_MSG_CHANNEL_EOF: u8 = 96;
pub const SSH_MSG_CHANNEL_CLOSE: u8 = 97;
pub const SSH_MSG_CHANNEL_REQUEST: u8 = 98;
pub const SSH_MSG_CHANNEL_SUCCESS: u8 = 99;
pub const SSH_MSG_CHANNEL_FAILURE: u8 = 100;

/// `SSH_OPEN_ADMINISTRATIVELY_PROHIBITED` and friends, for
/// `CHANNEL_OPEN_FAILURE`'s reason code. Only decoded, never constructed,
/// since this engine never rejects an open on the client side.
pub const SSH_OPEN_ADMINISTRATIVELY_PROHIBITED: u32 = 1;
pub const SSH_OPEN_CONNECT_FAILED: u32 = 2;
pub const SSH_OPEN_UNKNOWN_CHANNEL_TYPE: u32 = 3;
pub const SSH_OPEN_RESOURCE_SHORTAGE: u32 = 4;

pub fn open_failure_reason_str(reason: u32) -> &'static str {
    match reason {
        SSH_OPEN_ADMINISTRATIVELY_PROHIBITED => "administratively prohibited",
        SSH_OPEN_CONNECT_FAILED => "connect failed",
        SSH_OPEN_UNKNOWN_CHANNEL_TYPE => "unknown channel type",
        SSH_OPEN_RESOURCE_SHORTAGE => "resource shortage",
        _ => "unknown reason",
    }
}

/// `CHANNEL_OPEN` (90): `string type || u32 sender || u32 window || u32 max_packet`
pub fn encode_channel_open(
    buf: &mut ByteBuffer,
    channel_type: &str,
    sender: u32,
    window: u32,
    max_packet: u32,
) -> Result<()> {
    buf.write_u8(SSH_MSG_CHANNEL_OPEN)?;
    buf.write_cstring(channel_type)?;
    buf.write_u32(sender)?;
    buf.write_u32(window)?;
    buf.write_u32(max_packet)?;
    Ok(())
}

pub struct OpenConfirmation {
    pub recipient: u32,
    pub sender: u32,
    pub window: u32,
    pub max_packet: u32,
}

/// `CHANNEL_OPEN_CONFIRMATION` (91): `u32 recipient || u32 sender || u32 window || u32 max_packet`
/// Assumes the message-type byte has already been consumed by the caller.
pub fn decode_channel_open_confirmation(r: &mut ByteReader) -> Result<OpenConfirmation> {
    Ok(OpenConfirmation {
        recipient: r.read_u32()?,
        sender: r.read_u32()?,
        window: r.read_u32()?,
        max_packet: r.read_u32()?,
    })
}

pub struct OpenFailure<'a> {
    pub recipient: u32,
    pub reason: u32,
    pub description: WireStr<'a>,
}

/// `CHANNEL_OPEN_FAILURE` (92): `u32 recipient || u32 reason || string desc || string lang`
pub fn decode_channel_open_failure<'a>(r: &mut ByteReader<'a>) -> Result<OpenFailure<'a>> {
    let recipient = r.read_u32()?;
    let reason = r.read_u32()?;
    let description = r.read_string()?;
    let _lang = r.read_string()?;
    Ok(OpenFailure {
        recipient,
        reason,
        description,
    })
}

/// `CHANNEL_WINDOW_ADJUST` (93): `u32 recipient || u32 bytes`
pub fn decode_window_adjust(r: &mut ByteReader) -> Result<(u32, u32)> {
    Ok((r.read_u32()?, r.read_u32()?))
}

pub fn encode_window_adjust(buf: &mut ByteBuffer, recipient: u32, bytes: u32) -> Result<()> {
    buf.write_u8(SSH_MSG_CHANNEL_WINDOW_ADJUST)?;
    buf.write_u32(recipient)?;
    buf.write_u32(bytes)?;
    Ok(())
}

/// `CHANNEL_DATA` (94): `u32 recipient || string data`
pub fn encode_channel_data(buf: &mut ByteBuffer, recipient: u32, data: &[u8]) -> Result<()> {
    buf.write_u8(SSH_MSG_CHANNEL_DATA)?;
    buf.write_u32(recipient)?;
    buf.write_data(data)?;
    Ok(())
}

pub fn decode_channel_data<'a>(r: &mut ByteReader<'a>) -> Result<(u32, WireStr<'a>)> {
    Ok((r.read_u32()?, r.read_string()?))
}

/// `CHANNEL_EXTENDED_DATA` (95): `u32 recipient || u32 code || string data`
pub fn encode_channel_extended_data(
    buf: &mut ByteBuffer,
    recipient: u32,
    code: u32,
    data: &[u8],
) -> Result<()> {
    buf.write_u8(SSH_MSG_CHANNEL_EXTENDED_DATA)?;
    buf.write_u32(recipient)?;
    buf.write_u32(code)?;
    buf.write_data(data)?;
    Ok(())
}

pub fn decode_channel_extended_data<'a>(
    r: &mut ByteReader<'a>,
) -> Result<(u32, u32, WireStr<'a>)> {
    let recipient = r.read_u32()?;
    let code = r.read_u32()?;
    let data = r.read_string()?;
    Ok((recipient, code, data))
}

/// `CHANNEL_EOF` (96) / `CHANNEL_CLOSE` (97): `u32 recipient`
pub fn decode_recipient_only(r: &mut ByteReader) -> Result<u32> {
    r.read_u32()
}

pub fn encode_channel_eof(buf: &mut ByteBuffer, recipient: u32) -> Result<()> {
    buf.write_u8(SSH_MSG_CHANNEL_EOF)?;
    buf.write_u32(recipient)?;
    Ok(())
}

pub fn encode_channel_close(buf: &mut ByteBuffer, recipient: u32) -> Result<()> {
    buf.write_u8(SSH_MSG_CHANNEL_CLOSE)?;
    buf.write_u32(recipient)?;
    Ok(())
}

/// `CHANNEL_REQUEST` (98) header: `u32 recipient || string req || bool want_reply || ...`
/// The `...` tail is request-specific and appended by the caller before
/// the packet is sent.
pub fn encode_channel_request_header(
    buf: &mut ByteBuffer,
    recipient: u32,
    request_name: &str,
    want_reply: bool,
) -> Result<()> {
    buf.write_u8(SSH_MSG_CHANNEL_REQUEST)?;
    buf.write_u32(recipient)?;
    buf.write_cstring(request_name)?;
    buf.write_bool(want_reply)?;
    Ok(())
}

/// `pty-req` request payload (appended after the `CHANNEL_REQUEST` header):
/// `string TERM || u32 cols || u32 rows || u32 width_px || u32 height_px || string modes`
pub fn encode_pty_req_payload(
    buf: &mut ByteBuffer,
    term: &str,
    cols: u32,
    rows: u32,
    width_px: u32,
    height_px: u32,
) -> Result<()> {
    buf.write_cstring(term)?;
    buf.write_u32(cols)?;
    buf.write_u32(rows)?;
    buf.write_u32(width_px)?;
    buf.write_u32(height_px)?;
    buf.write_data(b"")?; // modes: empty
    Ok(())
}

/// `CHANNEL_SUCCESS` (99) / `CHANNEL_FAILURE` (100): `u32 recipient`
pub fn encode_channel_success(buf: &mut ByteBuffer, recipient: u32) -> Result<()> {
    buf.write_u8(SSH_MSG_CHANNEL_SUCCESS)?;
    buf.write_u32(recipient)?;
    Ok(())
}

pub fn encode_channel_failure(buf: &mut ByteBuffer, recipient: u32) -> Result<()> {
    buf.write_u8(SSH_MSG_CHANNEL_FAILURE)?;
    buf.write_u32(recipient)?;
    Ok(())
}

pub struct GlobalRequest<'a> {
    pub name: WireStr<'a>,
    pub want_reply: bool,
}

/// `GLOBAL_REQUEST` (80): `string name || bool want_reply || ...`
/// This engine advertises no global capabilities, so the request-specific
/// tail is never interpreted; it just informs the want-reply decision.
pub fn decode_global_request<'a>(r: &mut ByteReader<'a>) -> Result<GlobalRequest<'a>> {
    let name = r.read_string()?;
    let want_reply = r.read_bool()?;
    Ok(GlobalRequest { name, want_reply })
}

pub fn encode_request_failure(buf: &mut ByteBuffer) -> Result<()> {
    buf.write_u8(SSH_MSG_REQUEST_FAILURE)?;
    Ok(())
}
