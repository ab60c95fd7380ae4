//! Fixed 24-byte frame header shared by every datagram on the wire.
//!
//! A datagram is exactly `header ∥ payload`. The header is big-endian
//! throughout, as in the gateway's original `dkmrtp_ipc` header layout.

use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// `'RIPC'` — magic value used to recognize a valid frame.
pub const MAGIC: u32 = 0x5249_5043;
/// Current protocol version.
pub const VERSION: u16 = 0x0001;
/// On-wire size of [`FrameHeader`] in bytes.
pub const HEADER_LEN: usize = 24;

/// Recognized frame kinds (spec.md §6). Legacy `0x01xx`/`0x02xx` codes are
/// accepted on receive but are not emitted by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
  /// UI → agent, CBOR-encoded request object.
  Req,
  /// agent → UI, CBOR-encoded response object.
  Rsp,
  /// agent → UI, CBOR-encoded event object.
  Evt,
  /// A legacy typed command/response/event code that predates the
  /// unified REQ/RSP/EVT envelope model.
  Legacy(u16),
  /// Any other, entirely unrecognized type code.
  Unknown(u16),
}

impl FrameType {
  pub const REQ: u16 = 0x1000;
  pub const RSP: u16 = 0x1001;
  pub const EVT: u16 = 0x1002;

  pub fn from_wire(value: u16) -> FrameType {
    match value {
      Self::REQ => FrameType::Req,
      Self::RSP => FrameType::Rsp,
      Self::EVT => FrameType::Evt,
      v if (0x0100..0x0300).contains(&v) => FrameType::Legacy(v),
      v => FrameType::Unknown(v),
    }
  }

  pub fn to_wire(self) -> u16 {
    match self {
      FrameType::Req => Self::REQ,
      FrameType::Rsp => Self::RSP,
      FrameType::Evt => Self::EVT,
      FrameType::Legacy(v) | FrameType::Unknown(v) => v,
    }
  }
}

/// The fixed 24-byte header preceding every frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
  pub magic: u32,
  pub version: u16,
  pub frame_type: u16,
  pub corr_id: u32,
  pub length: u32,
  pub ts_ns: u64,
}

/// Reason a datagram was rejected by [`decode`]. Rejections are silent at
/// the transport layer (spec.md §7) — a bad packet on a public UDP port
/// must not produce a log flood — but callers may still want to count
/// them, so `decode` returns this instead of unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRejectReason {
  TooShort,
  BadMagic,
  BadVersion,
  LengthMismatch,
}

fn monotonic_ns() -> u64 {
  // The header timestamp is sender-local and debug-only (spec.md §3); any
  // monotonically-nondecreasing-enough clock will do. We use wall-clock
  // time since UNIX_EPOCH, which is what a receiver would want to log
  // anyway.
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos() as u64)
    .unwrap_or(0)
}

/// Encode `payload` behind a freshly-stamped header. `payload.len()` must
/// fit in a `u32`; this is true for any payload up to 4 GiB, far beyond a
/// single UDP datagram's practical ~65507-byte limit.
pub fn encode(frame_type: FrameType, corr_id: u32, payload: &[u8]) -> Vec<u8> {
  let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
  out.write_u32::<BigEndian>(MAGIC).expect("write to Vec never fails");
  out.write_u16::<BigEndian>(VERSION).expect("write to Vec never fails");
  out.write_u16::<BigEndian>(frame_type.to_wire()).expect("write to Vec never fails");
  out.write_u32::<BigEndian>(corr_id).expect("write to Vec never fails");
  out.write_u32::<BigEndian>(payload.len() as u32).expect("write to Vec never fails");
  out.write_u64::<BigEndian>(monotonic_ns()).expect("write to Vec never fails");
  out.extend_from_slice(payload);
  out
}

/// Decode a received datagram into its header and payload slice, or a
/// rejection reason. `bytes` is the entire datagram as received.
pub fn decode(bytes: &[u8]) -> Result<(FrameHeader, &[u8]), FrameRejectReason> {
  if bytes.len() < HEADER_LEN {
    return Err(FrameRejectReason::TooShort);
  }
  let mut cursor = &bytes[..HEADER_LEN];
  let magic = cursor.read_u32::<BigEndian>().expect("slice is HEADER_LEN bytes");
  let version = cursor.read_u16::<BigEndian>().expect("slice is HEADER_LEN bytes");
  let frame_type = cursor.read_u16::<BigEndian>().expect("slice is HEADER_LEN bytes");
  let corr_id = cursor.read_u32::<BigEndian>().expect("slice is HEADER_LEN bytes");
  let length = cursor.read_u32::<BigEndian>().expect("slice is HEADER_LEN bytes");
  let ts_ns = cursor.read_u64::<BigEndian>().expect("slice is HEADER_LEN bytes");

  if magic != MAGIC {
    return Err(FrameRejectReason::BadMagic);
  }
  if version != VERSION {
    return Err(FrameRejectReason::BadVersion);
  }
  let payload = &bytes[HEADER_LEN..];
  if length as usize != payload.len() {
    return Err(FrameRejectReason::LengthMismatch);
  }
  Ok((FrameHeader { magic, version, frame_type, corr_id, length, ts_ns }, payload))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trip_preserves_payload_and_length() {
    let payload = b"hello gateway".to_vec();
    let wire = encode(FrameType::Req, 42, &payload);
    let (header, decoded_payload) = decode(&wire).expect("well-formed frame decodes");
    assert_eq!(header.magic, MAGIC);
    assert_eq!(header.version, VERSION);
    assert_eq!(header.frame_type, FrameType::REQ);
    assert_eq!(header.corr_id, 42);
    assert_eq!(header.length as usize, payload.len());
    assert_eq!(decoded_payload, &payload[..]);
  }

  #[test]
  fn round_trip_empty_payload() {
    let wire = encode(FrameType::Evt, 0, &[]);
    let (header, payload) = decode(&wire).unwrap();
    assert_eq!(header.length, 0);
    assert!(payload.is_empty());
  }

  #[test]
  fn rejects_short_datagram() {
    assert_eq!(decode(&[0u8; 10]), Err(FrameRejectReason::TooShort));
  }

  #[test]
  fn rejects_bad_magic() {
    let mut wire = encode(FrameType::Req, 1, b"x");
    wire[0] ^= 0xff;
    assert_eq!(decode(&wire), Err(FrameRejectReason::BadMagic));
  }

  #[test]
  fn rejects_bad_version() {
    let mut wire = encode(FrameType::Req, 1, b"x");
    wire[4] = 0x00;
    wire[5] = 0x02;
    assert_eq!(decode(&wire), Err(FrameRejectReason::BadVersion));
  }

  #[test]
  fn rejects_length_mismatch() {
    let mut wire = encode(FrameType::Req, 1, b"hello");
    // Claim one fewer payload byte than was actually sent.
    wire[11] -= 1;
    assert_eq!(decode(&wire), Err(FrameRejectReason::LengthMismatch));
  }

  #[test]
  fn frame_type_round_trips_through_wire_value() {
    assert_eq!(FrameType::from_wire(FrameType::REQ), FrameType::Req);
    assert_eq!(FrameType::from_wire(FrameType::RSP), FrameType::Rsp);
    assert_eq!(FrameType::from_wire(FrameType::EVT), FrameType::Evt);
    assert!(matches!(FrameType::from_wire(0x0101), FrameType::Legacy(0x0101)));
    assert!(matches!(FrameType::from_wire(0x0203), FrameType::Legacy(0x0203)));
    assert!(matches!(FrameType::from_wire(0xBEEF), FrameType::Unknown(0xBEEF)));
  }
}
