//! Compact binary frame codec for position reports
//!
//! Frame layout, all integers big-endian:
//!
//! ```text
//! offset  size  field
//! 0       1     format version (FRAME_VERSION)
//! 1       4     sequence number (u32)
//! 5       4     timestamp, epoch seconds (u32)
//! 9       4     latitude  * 10^7 (i32)
//! 13      4     longitude * 10^7 (i32)
//! 17      1     agent id length N (u8)
//! 18      N     agent id, UTF-8
//! ```
//!
//! A report with a 36 character UUID id encodes to 54 bytes. The JSON payload
//! the fleet used to publish is kept behind [`PayloadFormat::Json`] for old
//! consumers and is roughly three times larger.

use super::report::{Position, PositionReport};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current binary frame format version
pub const FRAME_VERSION: u8 = 1;

/// Fixed-point scale applied to coordinates
pub const COORDINATE_SCALE: f64 = 1e7;

/// Bytes before the agent id: version, sequence, timestamp, lat, lon, id length
pub const FRAME_HEADER_LEN: usize = 1 + 4 + 4 + 4 + 4 + 1;

/// Longest agent id the one-byte length prefix can describe
pub const MAX_AGENT_ID_LEN: usize = u8::MAX as usize;

/// Codec failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Agent id is {len} bytes, maximum is {max}")]
    IdTooLong { len: usize, max: usize },
    #[error("Coordinate out of range: lat {latitude}, lon {longitude}")]
    CoordinateOutOfRange { latitude: f64, longitude: f64 },
}

impl CodecError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame(reason.into())
    }
}

/// Exact encoded size of a binary frame for an id of `id_len` bytes
pub fn frame_len(id_len: usize) -> usize {
    FRAME_HEADER_LEN + id_len
}

/// Reject ids the length prefix cannot carry
pub fn check_agent_id(agent_id: &str) -> Result<(), CodecError> {
    let len = agent_id.len();
    if len > MAX_AGENT_ID_LEN {
        return Err(CodecError::IdTooLong {
            len,
            max: MAX_AGENT_ID_LEN,
        });
    }
    Ok(())
}

/// Snap a coordinate onto the 10^-7 degree grid the frame can represent.
///
/// Reports built from quantized coordinates survive a binary round trip
/// bit-for-bit.
pub fn quantize_coordinate(value: f64) -> f64 {
    f64::from(to_fixed(value)) / COORDINATE_SCALE
}

fn to_fixed(value: f64) -> i32 {
    // Callers check range first; 180 * 10^7 fits comfortably in i32
    (value * COORDINATE_SCALE).round() as i32
}

fn from_fixed(value: i32) -> f64 {
    f64::from(value) / COORDINATE_SCALE
}

/// Encode a report into a binary frame
pub fn encode(report: &PositionReport) -> Result<Bytes, CodecError> {
    check_agent_id(&report.agent_id)?;
    if !report.position().is_valid() {
        return Err(CodecError::CoordinateOutOfRange {
            latitude: report.latitude_deg,
            longitude: report.longitude_deg,
        });
    }

    let id = report.agent_id.as_bytes();
    let mut buf = BytesMut::with_capacity(frame_len(id.len()));
    buf.put_u8(FRAME_VERSION);
    buf.put_u32(report.sequence_number);
    buf.put_u32(report.timestamp_epoch_seconds);
    buf.put_i32(to_fixed(report.latitude_deg));
    buf.put_i32(to_fixed(report.longitude_deg));
    buf.put_u8(id.len() as u8);
    buf.put_slice(id);
    Ok(buf.freeze())
}

/// Decode a binary frame; the exact inverse of [`encode`]
pub fn decode(frame: &[u8]) -> Result<PositionReport, CodecError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(CodecError::malformed(format!(
            "frame is {} bytes, minimum is {FRAME_HEADER_LEN}",
            frame.len()
        )));
    }

    let mut buf = frame;
    let version = buf.get_u8();
    if version != FRAME_VERSION {
        return Err(CodecError::malformed(format!(
            "unsupported frame version {version}"
        )));
    }

    let sequence_number = buf.get_u32();
    let timestamp_epoch_seconds = buf.get_u32();
    let latitude_deg = from_fixed(buf.get_i32());
    let longitude_deg = from_fixed(buf.get_i32());
    let id_len = buf.get_u8() as usize;

    if buf.remaining() != id_len {
        return Err(CodecError::malformed(format!(
            "declared id length {id_len}, {} bytes follow",
            buf.remaining()
        )));
    }
    let agent_id = std::str::from_utf8(buf)
        .map_err(|e| CodecError::malformed(format!("agent id is not UTF-8: {e}")))?
        .to_string();

    if !Position::new(latitude_deg, longitude_deg).is_valid() {
        return Err(CodecError::malformed(format!(
            "coordinates out of range: lat {latitude_deg}, lon {longitude_deg}"
        )));
    }

    Ok(PositionReport {
        agent_id,
        sequence_number,
        timestamp_epoch_seconds,
        latitude_deg,
        longitude_deg,
    })
}

/// JSON payload published before the binary frame existed.
///
/// `ts`, `uuid`, `name`, `latitude` and `longitude` are what the first
/// deployment's dashboards read; `seq` is extra and optional on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyJsonPayload {
    pub ts: u32,
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
    pub latitude: f64,
    pub longitude: f64,
}

impl LegacyJsonPayload {
    pub fn new(report: &PositionReport, display_name: &str) -> Self {
        Self {
            ts: report.timestamp_epoch_seconds,
            uuid: report.agent_id.clone(),
            name: display_name.to_string(),
            seq: Some(report.sequence_number),
            latitude: report.latitude_deg,
            longitude: report.longitude_deg,
        }
    }
}

impl From<LegacyJsonPayload> for PositionReport {
    fn from(payload: LegacyJsonPayload) -> Self {
        Self {
            agent_id: payload.uuid,
            sequence_number: payload.seq.unwrap_or_default(),
            timestamp_epoch_seconds: payload.ts,
            latitude_deg: payload.latitude,
            longitude_deg: payload.longitude,
        }
    }
}

/// Wire encoding selected for a deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    Binary,
    Json,
}

impl PayloadFormat {
    /// Encode `report`; `display_name` only appears in the JSON payload
    pub fn encode(&self, report: &PositionReport, display_name: &str) -> Result<Bytes, CodecError> {
        match self {
            PayloadFormat::Binary => encode(report),
            PayloadFormat::Json => {
                check_agent_id(&report.agent_id)?;
                let json = serde_json::to_vec(&LegacyJsonPayload::new(report, display_name))
                    .map_err(|e| CodecError::malformed(format!("JSON encoding failed: {e}")))?;
                Ok(Bytes::from(json))
            }
        }
    }
}

/// Decode either wire format, telling them apart by the first byte.
/// Both paths apply the same id-length and coordinate-range checks.
pub fn decode_any(payload: &[u8]) -> Result<PositionReport, CodecError> {
    match payload.first() {
        Some(b'{') => decode_json(payload),
        _ => decode(payload),
    }
}

fn decode_json(payload: &[u8]) -> Result<PositionReport, CodecError> {
    let report: PositionReport = serde_json::from_slice::<LegacyJsonPayload>(payload)
        .map_err(|e| CodecError::malformed(format!("invalid JSON payload: {e}")))?
        .into();

    check_agent_id(&report.agent_id)
        .map_err(|e| CodecError::malformed(e.to_string()))?;
    if !report.position().is_valid() {
        return Err(CodecError::malformed(format!(
            "coordinates out of range: lat {}, lon {}",
            report.latitude_deg, report.longitude_deg
        )));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn report(id: &str) -> PositionReport {
        PositionReport {
            agent_id: id.to_string(),
            sequence_number: 42,
            timestamp_epoch_seconds: 1_531_604_906,
            latitude_deg: quantize_coordinate(48.8581824),
            longitude_deg: quantize_coordinate(2.2127304),
        }
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode(&report("A1")).unwrap();

        assert_eq!(frame.len(), frame_len(2));
        assert_eq!(frame[0], FRAME_VERSION);
        assert_eq!(&frame[1..5], &42u32.to_be_bytes());
        assert_eq!(&frame[5..9], &1_531_604_906u32.to_be_bytes());
        assert_eq!(&frame[9..13], &488_581_824i32.to_be_bytes());
        assert_eq!(&frame[13..17], &22_127_304i32.to_be_bytes());
        assert_eq!(frame[17], 2);
        assert_eq!(&frame[18..], b"A1");
    }

    #[test]
    fn test_round_trip_example() {
        let original = report("7ebf7ece-1332-44ad-8f3a-db72245eded5");
        let decoded = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_binary_is_smaller_than_json() {
        let r = report("7ebf7ece-1332-44ad-8f3a-db72245eded5");
        let binary = PayloadFormat::Binary.encode(&r, "drone1").unwrap();
        let json = PayloadFormat::Json.encode(&r, "drone1").unwrap();
        assert_eq!(binary.len(), 54);
        assert!(json.len() > 2 * binary.len());
    }

    #[test]
    fn test_id_too_long_rejected() {
        let r = report(&"x".repeat(300));
        assert_eq!(
            encode(&r),
            Err(CodecError::IdTooLong { len: 300, max: 255 })
        );
        assert!(matches!(
            PayloadFormat::Json.encode(&r, "long"),
            Err(CodecError::IdTooLong { .. })
        ));
    }

    #[test]
    fn test_id_at_limit_accepted() {
        let r = report(&"x".repeat(MAX_AGENT_ID_LEN));
        let frame = encode(&r).unwrap();
        assert_eq!(frame.len(), frame_len(255));
        assert_eq!(decode(&frame).unwrap(), r);
    }

    #[test]
    fn test_out_of_range_coordinates_rejected() {
        let mut r = report("A1");
        r.latitude_deg = 91.0;
        assert!(matches!(
            encode(&r),
            Err(CodecError::CoordinateOutOfRange { .. })
        ));
    }

    #[test]
    fn test_decode_short_buffer() {
        let frame = encode(&report("A1")).unwrap();
        assert!(matches!(
            decode(&frame[..10]),
            Err(CodecError::MalformedFrame(_))
        ));
        assert!(matches!(decode(&[]), Err(CodecError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_unknown_version() {
        let mut frame = encode(&report("A1")).unwrap().to_vec();
        frame[0] = 9;
        let err = decode(&frame).unwrap_err();
        assert!(err.to_string().contains("version 9"));
    }

    #[test]
    fn test_decode_truncated_id() {
        let frame = encode(&report("drone-1")).unwrap();
        assert!(matches!(
            decode(&frame[..frame.len() - 1]),
            Err(CodecError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_trailing_garbage() {
        let mut frame = encode(&report("A1")).unwrap().to_vec();
        frame.push(0);
        assert!(matches!(decode(&frame), Err(CodecError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_invalid_utf8_id() {
        let mut frame = encode(&report("ab")).unwrap().to_vec();
        frame[18] = 0xff;
        assert!(matches!(decode(&frame), Err(CodecError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_out_of_range_fixed_point() {
        let mut frame = encode(&report("A1")).unwrap().to_vec();
        frame[9..13].copy_from_slice(&i32::MAX.to_be_bytes());
        assert!(matches!(decode(&frame), Err(CodecError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_any_accepts_both_formats() {
        let r = report("drone-1");
        let from_binary = decode_any(&PayloadFormat::Binary.encode(&r, "d1").unwrap()).unwrap();
        let from_json = decode_any(&PayloadFormat::Json.encode(&r, "d1").unwrap()).unwrap();
        assert_eq!(from_binary, r);
        assert_eq!(from_json.agent_id, r.agent_id);
        assert_eq!(from_json.sequence_number, r.sequence_number);
        assert!((from_json.latitude_deg - r.latitude_deg).abs() < 1e-9);
        assert!((from_json.longitude_deg - r.longitude_deg).abs() < 1e-9);
    }

    #[test]
    fn test_decode_any_original_dashboard_payload() {
        // Payload shape published by the first single-drone deployment, minus the
        // tuple-wrapped timestamp
        let payload = br#"{"ts": 1531604906, "uuid": "7ebf7ece", "name": "drone1", "latitude": 48.85150569993735, "longitude": 2.2119310978842477}"#;
        let r = decode_any(payload).unwrap();
        assert_eq!(r.agent_id, "7ebf7ece");
        assert_eq!(r.sequence_number, 0);
        assert_eq!(r.timestamp_epoch_seconds, 1_531_604_906);
    }

    #[test]
    fn test_json_payload_keeps_dashboard_fields() {
        let json = PayloadFormat::Json.encode(&report("7ebf"), "drone1").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();

        assert_eq!(value["ts"], 1_531_604_906);
        assert_eq!(value["uuid"], "7ebf");
        assert_eq!(value["name"], "drone1");
        assert_eq!(value["seq"], 42);
        assert!(value["latitude"].is_f64());
        assert!(value["longitude"].is_f64());
    }

    #[test]
    fn test_decode_any_rejects_out_of_range_json() {
        let payload = br#"{"ts": 1, "uuid": "A1", "name": "a", "latitude": 123.0, "longitude": 2.0}"#;
        assert!(matches!(
            decode_any(payload),
            Err(CodecError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_any_rejects_long_json_id() {
        let payload = format!(
            r#"{{"ts": 1, "uuid": "{}", "latitude": 1.0, "longitude": 2.0}}"#,
            "x".repeat(300)
        );
        assert!(matches!(
            decode_any(payload.as_bytes()),
            Err(CodecError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_payload_format_serde() {
        let format: PayloadFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, PayloadFormat::Json);
        assert_eq!(PayloadFormat::default(), PayloadFormat::Binary);
    }

    proptest! {
        #[test]
        fn round_trip_holds_for_valid_reports(
            id in "[a-zA-Z0-9._-]{0,255}",
            seq in any::<u32>(),
            ts in any::<u32>(),
            lat in -90.0f64..=90.0,
            lon in -180.0f64..=180.0,
        ) {
            let original = PositionReport {
                agent_id: id,
                sequence_number: seq,
                timestamp_epoch_seconds: ts,
                latitude_deg: quantize_coordinate(lat),
                longitude_deg: quantize_coordinate(lon),
            };
            let frame = encode(&original).unwrap();
            prop_assert_eq!(frame.len(), frame_len(original.agent_id.len()));
            prop_assert_eq!(decode(&frame).unwrap(), original);
        }

        #[test]
        fn quantization_error_is_bounded(lat in -90.0f64..=90.0) {
            prop_assert!((quantize_coordinate(lat) - lat).abs() <= 0.5 / COORDINATE_SCALE + 1e-12);
        }
    }
}
