//! ZK time-clock TCP wire format.
//!
//! All integers are little-endian. Each TCP frame is:
//!
//! ```text
//! [2: 0x5050][2: 0x7D82][4: payload_len][2: command][2: checksum][2: session_id][2: reply_id][N: data]
//! ```
//!
//! `payload_len` covers the 8-byte command header plus `data`.

use crate::error::{DeviceError, DeviceResult};
use crate::DeviceEvent;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use tracing::warn;

pub const MACHINE_PREPARE_DATA_1: u16 = 0x5050;
pub const MACHINE_PREPARE_DATA_2: u16 = 0x7D82;

/// Size of the TCP envelope preceding every packet.
pub const TOP_SIZE: usize = 8;
/// Size of the command header.
pub const HEADER_SIZE: usize = 8;

/// Largest payload accepted from a device in one frame.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Largest block requested per `CMD_READ_BUFFER`.
pub const MAX_CHUNK: u32 = 0xFFC0;

/// Widest attendance record layout.
pub const MAX_RECORD_SIZE: u32 = 40;

/// Hard cap on a buffered transfer, whatever the device claims to hold.
pub const MAX_BUFFER_SIZE: u32 = 64 * 1024 * 1024;

const USHRT_MAX: i64 = 65535;

pub const CMD_CONNECT: u16 = 1000;
pub const CMD_EXIT: u16 = 1001;
pub const CMD_AUTH: u16 = 1102;
pub const CMD_ATTLOG_RRQ: u16 = 13;
pub const CMD_GET_FREE_SIZES: u16 = 50;
pub const CMD_PREPARE_DATA: u16 = 1500;
pub const CMD_DATA: u16 = 1501;
pub const CMD_FREE_DATA: u16 = 1502;
pub const CMD_PREPARE_BUFFER: u16 = 1503;
pub const CMD_READ_BUFFER: u16 = 1504;
pub const CMD_ACK_OK: u16 = 2000;
pub const CMD_ACK_ERROR: u16 = 2001;
pub const CMD_ACK_UNAUTH: u16 = 2005;

/// Reply id a client starts from before `CMD_CONNECT`.
pub const INITIAL_REPLY_ID: u16 = (USHRT_MAX - 1) as u16;

/// Tick value mixed into the comm key.
pub const COMMKEY_TICKS: u8 = 50;

/// Replies that mean the device accepted a command.
pub fn is_success(command: u16) -> bool {
    matches!(command, CMD_ACK_OK | CMD_PREPARE_DATA | CMD_DATA)
}

/// One's-complement style 16-bit checksum used in the command header.
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut sum: i64 = 0;
    let mut words = bytes.chunks_exact(2);
    for word in &mut words {
        sum += i64::from(u16::from_le_bytes([word[0], word[1]]));
        if sum > USHRT_MAX {
            sum -= USHRT_MAX;
        }
    }
    if let [last] = words.remainder() {
        sum += i64::from(*last);
    }
    while sum > USHRT_MAX {
        sum -= USHRT_MAX;
    }

    sum = !sum;
    while sum < 0 {
        sum += USHRT_MAX;
    }
    sum as u16
}

/// Reply id following `reply_id`, wrapping below `u16::MAX`.
pub fn next_reply_id(reply_id: u16) -> u16 {
    let next = i64::from(reply_id) + 1;
    if next >= USHRT_MAX {
        (next - USHRT_MAX) as u16
    } else {
        next as u16
    }
}

/// A command or reply packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: u16,
    pub checksum: u16,
    pub session_id: u16,
    pub reply_id: u16,
    pub data: Vec<u8>,
}

impl Packet {
    /// Build a client request.
    ///
    /// The checksum covers the header as it looked with `prev_reply_id`; the
    /// packet is then stamped with the next reply id.
    pub fn request(command: u16, session_id: u16, prev_reply_id: u16, data: &[u8]) -> Self {
        let checksum = header_checksum(command, session_id, prev_reply_id, data);
        Self {
            command,
            checksum,
            session_id,
            reply_id: next_reply_id(prev_reply_id),
            data: data.to_vec(),
        }
    }

    /// Build a packet carrying exactly `reply_id`.
    pub fn reply(command: u16, session_id: u16, reply_id: u16, data: &[u8]) -> Self {
        Self {
            command,
            checksum: header_checksum(command, session_id, reply_id, data),
            session_id,
            reply_id,
            data: data.to_vec(),
        }
    }

    /// Encode including the TCP envelope.
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = HEADER_SIZE + self.data.len();
        let mut buf = Vec::with_capacity(TOP_SIZE + payload_len);
        buf.extend_from_slice(&MACHINE_PREPARE_DATA_1.to_le_bytes());
        buf.extend_from_slice(&MACHINE_PREPARE_DATA_2.to_le_bytes());
        buf.extend_from_slice(&(payload_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.command.to_le_bytes());
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf.extend_from_slice(&self.session_id.to_le_bytes());
        buf.extend_from_slice(&self.reply_id.to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decode a packet body (everything after the TCP envelope).
    pub fn decode(payload: &[u8]) -> DeviceResult<Self> {
        if payload.len() < HEADER_SIZE {
            return Err(DeviceError::Protocol(format!(
                "Packet too short: {} bytes, need at least {}",
                payload.len(),
                HEADER_SIZE
            )));
        }

        Ok(Self {
            command: read_u16(payload, 0),
            checksum: read_u16(payload, 2),
            session_id: read_u16(payload, 4),
            reply_id: read_u16(payload, 6),
            data: payload[HEADER_SIZE..].to_vec(),
        })
    }
}

fn header_checksum(command: u16, session_id: u16, reply_id: u16, data: &[u8]) -> u16 {
    let mut buf = Vec::with_capacity(HEADER_SIZE + data.len());
    buf.extend_from_slice(&command.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&session_id.to_le_bytes());
    buf.extend_from_slice(&reply_id.to_le_bytes());
    buf.extend_from_slice(data);
    checksum(&buf)
}

/// Validate a TCP envelope and return the payload length it announces.
pub fn parse_top(top: &[u8; TOP_SIZE]) -> DeviceResult<usize> {
    let magic1 = u16::from_le_bytes([top[0], top[1]]);
    let magic2 = u16::from_le_bytes([top[2], top[3]]);
    if magic1 != MACHINE_PREPARE_DATA_1 || magic2 != MACHINE_PREPARE_DATA_2 {
        return Err(DeviceError::Protocol(format!(
            "Bad frame magic: {magic1:#06x} {magic2:#06x}"
        )));
    }

    let len = u32::from_le_bytes([top[4], top[5], top[6], top[7]]) as usize;
    if len < HEADER_SIZE || len > MAX_PAYLOAD {
        return Err(DeviceError::Protocol(format!("Bad frame length: {len}")));
    }
    Ok(len)
}

/// Derive the `CMD_AUTH` key from the comm password and session id.
pub fn make_commkey(password: u32, session_id: u16, ticks: u8) -> [u8; 4] {
    let reversed = password.reverse_bits();
    let k = reversed.wrapping_add(u32::from(session_id)).to_le_bytes();
    let k = [k[0] ^ b'Z', k[1] ^ b'K', k[2] ^ b'S', k[3] ^ b'O'];
    // swap the two u16 halves
    let k = [k[2], k[3], k[0], k[1]];
    [k[0] ^ ticks, k[1] ^ ticks, ticks, k[3] ^ ticks]
}

/// Body of `CMD_PREPARE_BUFFER` asking for the output of `command`.
pub fn prepare_buffer_request(command: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(11);
    buf.push(1u8);
    buf.extend_from_slice(&command.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes());
    buf
}

/// Body of `CMD_READ_BUFFER` for one chunk.
pub fn read_buffer_request(start: u32, size: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&start.to_le_bytes());
    buf.extend_from_slice(&size.to_le_bytes());
    buf
}

/// Total size announced by a `CMD_PREPARE_BUFFER` acknowledgement.
pub fn buffer_size(data: &[u8]) -> DeviceResult<u32> {
    data.get(1..5)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| DeviceError::Protocol("Buffer acknowledgement too short".to_string()))
}

/// Size announced by a `CMD_PREPARE_DATA` reply.
pub fn prepare_data_size(data: &[u8]) -> DeviceResult<u32> {
    data.get(0..4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| DeviceError::Protocol("Prepare-data reply too short".to_string()))
}

/// Number of attendance records from a `CMD_GET_FREE_SIZES` reply.
///
/// The reply is 20 little-endian i32 counters; the ninth is the record count.
pub fn attendance_record_count(data: &[u8]) -> DeviceResult<u32> {
    if data.len() < 80 {
        return Err(DeviceError::Protocol(format!(
            "Free-sizes reply too short: {} bytes",
            data.len()
        )));
    }
    let raw = i32::from_le_bytes([data[32], data[33], data[34], data[35]]);
    Ok(raw.max(0) as u32)
}

/// Largest attendance log a device holding `records` entries may announce:
/// the 4-byte total plus `records` of the widest layout, capped at
/// [`MAX_BUFFER_SIZE`].
pub fn attendance_buffer_ceiling(records: u32) -> u32 {
    let wanted = 4 + u64::from(records) * u64::from(MAX_RECORD_SIZE);
    wanted.min(u64::from(MAX_BUFFER_SIZE)) as u32
}

/// Decode the packed device timestamp.
pub fn decode_time(raw: u32) -> Option<NaiveDateTime> {
    let mut t = raw;
    let second = t % 60;
    t /= 60;
    let minute = t % 60;
    t /= 60;
    let hour = t % 24;
    t /= 24;
    let day = t % 31 + 1;
    t /= 31;
    let month = t % 12 + 1;
    t /= 12;
    let year = i32::try_from(t).ok()? + 2000;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Inverse of [`decode_time`]. Only the last two digits of the year survive.
pub fn encode_time(ts: &NaiveDateTime) -> u32 {
    let year = (ts.year() % 100) as u32;
    let days = year * 12 * 31 + (ts.month() - 1) * 31 + ts.day() - 1;
    days * 24 * 60 * 60 + (ts.hour() * 60 + ts.minute()) * 60 + ts.second()
}

/// Decode the attendance log returned for `CMD_ATTLOG_RRQ`.
///
/// The blob starts with a u32 byte total; the record width (8, 16 or 40
/// bytes) depends on firmware and is inferred from `total / records`.
///
/// `records` and `total` both come from the device. A total larger than the
/// bytes received, or a count the total cannot hold, is a protocol error.
pub fn decode_attendance(blob: &[u8], records: u32) -> DeviceResult<Vec<DeviceEvent>> {
    if records == 0 || blob.len() < 4 {
        return Ok(Vec::new());
    }

    let total = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
    let body = &blob[4..];
    if total as usize > body.len() {
        return Err(DeviceError::Protocol(format!(
            "Attendance log truncated: header announces {total} bytes, received {}",
            body.len()
        )));
    }
    let body = &body[..total as usize];

    let record_size: usize = if u64::from(total) == u64::from(records) * 8 {
        8
    } else if u64::from(total) == u64::from(records) * 16 {
        16
    } else {
        MAX_RECORD_SIZE as usize
    };
    if u64::from(records) * record_size as u64 > u64::from(total) {
        return Err(DeviceError::Protocol(format!(
            "Device reports {records} records but the log holds only {total} bytes"
        )));
    }

    let mut events = Vec::with_capacity(body.len() / record_size);
    for record in body.chunks_exact(record_size) {
        let (subject_id, raw_time) = match record_size {
            // The 8-byte layout carries only the device-internal uid. Mapping
            // it to the enrolled user id needs the user table, which is not
            // read, so the uid itself becomes the subject id.
            8 => (read_u16(record, 0).to_string(), read_u32(record, 3)),
            16 => (read_u32(record, 0).to_string(), read_u32(record, 4)),
            _ => {
                let field = &record[2..26];
                let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
                (
                    String::from_utf8_lossy(&field[..end]).into_owned(),
                    read_u32(record, 27),
                )
            }
        };

        let Some(timestamp) = decode_time(raw_time) else {
            warn!(subject_id = %subject_id, raw_time, "Skipping record with invalid device time");
            continue;
        };
        if subject_id.is_empty() {
            warn!(timestamp = %timestamp, "Skipping record without user id");
            continue;
        }

        events.push(DeviceEvent {
            subject_id,
            timestamp,
        });
    }

    Ok(events)
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Encode one 40-byte attendance record. Used by fake devices in tests.
pub fn encode_record_40(uid: u16, user_id: &str, ts: &NaiveDateTime) -> Vec<u8> {
    let mut rec = vec![0u8; 40];
    rec[0..2].copy_from_slice(&uid.to_le_bytes());
    let id = user_id.as_bytes();
    let n = id.len().min(23);
    rec[2..2 + n].copy_from_slice(&id[..n]);
    rec[26] = 1;
    rec[27..31].copy_from_slice(&encode_time(ts).to_le_bytes());
    rec
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_checksum_known_values() {
        assert_eq!(checksum(&[1, 2, 3]), 65018);
        assert_eq!(checksum(&[0xff, 0xff, 0xff, 0xff]), 65534);
        assert_eq!(checksum(&[]), 65534);
    }

    #[test]
    fn test_connect_request_bytes() {
        let packet = Packet::request(CMD_CONNECT, 0, INITIAL_REPLY_ID, &[]);
        assert_eq!(packet.reply_id, 0);
        assert_eq!(packet.checksum, 64535);
        assert_eq!(
            packet.encode(),
            vec![
                0x50, 0x50, 0x82, 0x7d, 0x08, 0x00, 0x00, 0x00, 0xe8, 0x03, 0x17, 0xfc, 0x00,
                0x00, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn test_next_reply_id_wraps() {
        assert_eq!(next_reply_id(0), 1);
        assert_eq!(next_reply_id(65533), 65534);
        assert_eq!(next_reply_id(65534), 0);
    }

    #[test]
    fn test_packet_decode() {
        let packet = Packet::reply(CMD_ACK_OK, 0x1234, 7, &[9, 8, 7]);
        let encoded = packet.encode();

        let top: [u8; TOP_SIZE] = encoded[..TOP_SIZE].try_into().unwrap();
        let len = parse_top(&top).unwrap();
        assert_eq!(len, HEADER_SIZE + 3);

        let decoded = Packet::decode(&encoded[TOP_SIZE..]).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_decode_short_packet() {
        assert!(matches!(
            Packet::decode(&[0, 1, 2]),
            Err(DeviceError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_top_rejects_bad_magic() {
        let top = [0x00, 0x00, 0x82, 0x7d, 0x08, 0x00, 0x00, 0x00];
        assert!(matches!(parse_top(&top), Err(DeviceError::Protocol(_))));
    }

    #[test]
    fn test_parse_top_rejects_short_length() {
        let top = [0x50, 0x50, 0x82, 0x7d, 0x04, 0x00, 0x00, 0x00];
        assert!(parse_top(&top).is_err());
    }

    #[test]
    fn test_make_commkey_known_values() {
        assert_eq!(make_commkey(0, 0, COMMKEY_TICKS), [97, 125, 50, 121]);
        assert_eq!(make_commkey(12345, 0x1234, COMMKEY_TICKS), [109, 225, 50, 107]);
        assert_eq!(make_commkey(1, 7, COMMKEY_TICKS), [97, 253, 50, 121]);
    }

    #[test]
    fn test_time_codec() {
        let t = ts(2024, 1, 1, 8, 0, 0);
        assert_eq!(encode_time(&t), 771_408_000);
        assert_eq!(decode_time(771_408_000), Some(t));

        let t = ts(2031, 12, 31, 23, 59, 59);
        assert_eq!(decode_time(encode_time(&t)), Some(t));
    }

    #[test]
    fn test_decode_time_rejects_impossible_date() {
        // February 30th
        let raw = ((24 * 12 * 31 + 31 + 29) * 24 * 60 * 60) as u32;
        assert_eq!(decode_time(raw), None);
    }

    #[test]
    fn test_attendance_record_count() {
        let mut data = vec![0u8; 80];
        data[32..36].copy_from_slice(&42i32.to_le_bytes());
        assert_eq!(attendance_record_count(&data).unwrap(), 42);
        assert!(attendance_record_count(&data[..40]).is_err());
    }

    #[test]
    fn test_decode_attendance_40_byte_records() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&80u32.to_le_bytes());
        blob.extend(encode_record_40(1, "A123", &ts(2024, 1, 1, 8, 0, 0)));
        blob.extend(encode_record_40(2, "B7", &ts(2024, 1, 1, 8, 5, 30)));

        let events = decode_attendance(&blob, 2).unwrap();
        assert_eq!(
            events,
            vec![
                DeviceEvent {
                    subject_id: "A123".into(),
                    timestamp: ts(2024, 1, 1, 8, 0, 0)
                },
                DeviceEvent {
                    subject_id: "B7".into(),
                    timestamp: ts(2024, 1, 1, 8, 5, 30)
                },
            ]
        );
    }

    #[test]
    fn test_decode_attendance_16_byte_records() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&16u32.to_le_bytes());
        let mut rec = vec![0u8; 16];
        rec[0..4].copy_from_slice(&9001u32.to_le_bytes());
        rec[4..8].copy_from_slice(&encode_time(&ts(2024, 3, 2, 17, 30, 0)).to_le_bytes());
        blob.extend(rec);

        let events = decode_attendance(&blob, 1).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subject_id, "9001");
        assert_eq!(events[0].timestamp, ts(2024, 3, 2, 17, 30, 0));
    }

    #[test]
    fn test_decode_attendance_8_byte_records() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&8u32.to_le_bytes());
        let mut rec = vec![0u8; 8];
        rec[0..2].copy_from_slice(&15u16.to_le_bytes());
        rec[3..7].copy_from_slice(&encode_time(&ts(2024, 1, 1, 8, 0, 0)).to_le_bytes());
        blob.extend(rec);

        let events = decode_attendance(&blob, 1).unwrap();
        assert_eq!(events[0].subject_id, "15");
    }

    #[test]
    fn test_decode_attendance_empty() {
        assert!(decode_attendance(&[], 5).unwrap().is_empty());
        assert!(decode_attendance(&[0, 0, 0, 0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_decode_attendance_rejects_inflated_count() {
        let err = decode_attendance(&[4, 0, 0, 0], i32::MAX as u32).unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(_)));

        let mut blob = Vec::new();
        blob.extend_from_slice(&40u32.to_le_bytes());
        blob.extend(encode_record_40(1, "A123", &ts(2024, 1, 1, 8, 0, 0)));
        let err = decode_attendance(&blob, 1_000_000).unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(_)));
    }

    #[test]
    fn test_decode_attendance_rejects_truncated_log() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&80u32.to_le_bytes());
        blob.extend(encode_record_40(1, "A123", &ts(2024, 1, 1, 8, 0, 0)));

        assert!(matches!(
            decode_attendance(&blob, 2),
            Err(DeviceError::Protocol(_))
        ));
    }

    #[test]
    fn test_attendance_buffer_ceiling() {
        assert_eq!(attendance_buffer_ceiling(2), 84);
        assert_eq!(attendance_buffer_ceiling(u32::MAX), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_decode_attendance_skips_blank_user() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&40u32.to_le_bytes());
        blob.extend(encode_record_40(3, "", &ts(2024, 1, 1, 8, 0, 0)));

        assert!(decode_attendance(&blob, 1).unwrap().is_empty());
    }
}
