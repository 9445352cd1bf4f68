//! Board Wire Protocol
//!
//! Reverse-engineered GATT protocol for Onewheel-family boards: service and
//! characteristic identifiers, the CRX challenge-response unlock, and the
//! binary telemetry codec. Everything here is pure; the transport lives in
//! [`super::transport`].

use crate::domain::models::{BoardError, TelemetrySnapshot};
use md5::{Digest, Md5};
use uuid::Uuid;

/// Primary board service UUID.
pub const PRIMARY_SERVICE_UUID: Uuid = board_uuid(0xf300);

/// All board characteristics share the primary service's base UUID and
/// differ only in the third hextet.
const fn board_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((0xe659_0000u128 | short as u128) << 96) | 0xea98_11e3_ac10_0800_200c_9a66)
}

// Characteristics present in both observed layouts.
pub const CHAR_SERIAL_NUMBER: Uuid = board_uuid(0xf301);
pub const CHAR_RIDE_MODE: Uuid = board_uuid(0xf302);
pub const CHAR_BATTERY_PERCENT: Uuid = board_uuid(0xf303);

/// Signal-strength floor for the device filter.
pub const RSSI_FLOOR_DBM: i16 = -80;

/// Name fragments that mark an advertisement as a board, matched
/// case-insensitively.
pub const BOARD_NAME_FRAGMENTS: &[&str] = &["onewheel", "ow", "pint"];

/// Known manufacturer MAC prefixes. An address match alone is not enough;
/// the primary service must also be advertised.
pub const BOARD_ADDRESS_PREFIXES: &[&str] = &["88:6b:0f", "0c:f3:ee", "98:5d:ad"];

/// Fixed 3-byte marker opening every valid challenge and response frame.
pub const CHALLENGE_SIGNATURE: [u8; 3] = [0x43, 0x52, 0x58]; // "CRX"

/// 16-byte MD5 input suffix shared by all unlock flows.
pub const SECRET_KEY: [u8; 16] = [
    0xd9, 0x25, 0x5f, 0x0f, 0x23, 0x35, 0x4e, 0x19, 0xba, 0x73, 0x9c, 0xcd, 0xc4, 0xa9, 0x17, 0x65,
];

/// signature(3) + digest(16) + checksum(1)
pub const RESPONSE_LEN: usize = 20;

pub const MIN_CHALLENGE_LEN_CLASSIC: usize = 20;
pub const MIN_CHALLENGE_LEN_MODIFIED: usize = 10;

/// Fixed unlock writes observed on GT-generation firmware. Neither has been
/// confirmed against hardware across revisions; they are tried in order and
/// verified through sentinel reads.
pub const DIRECT_UNLOCK_COMMAND: &[u8] = &[0x43, 0x52, 0x58, 0x01];
pub const ALTERNATE_UNLOCK_COMMAND: &[u8] = &[0x43, 0x52, 0x58, 0x02];

/// Telemetry fields decodable from board characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryField {
    BatteryPercent,
    Pitch,
    Roll,
    Yaw,
    Rpm,
    Temperature,
    Current,
    Voltage,
    TripOdometer,
    LifetimeOdometer,
    RideMode,
}

/// Two characteristic layouts exist across firmware revisions. They reuse
/// the same identifier range with different assignments (legacy pitch is
/// 0xf304, extended pitch is 0xf307), so the layout must be fixed per
/// connection before notifications are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicLayout {
    Legacy,
    Extended,
}

impl CharacteristicLayout {
    pub fn uuid_of(&self, field: TelemetryField) -> Uuid {
        use TelemetryField::*;
        let short = match (self, field) {
            (_, BatteryPercent) => 0xf303,
            (_, RideMode) => 0xf302,
            (Self::Legacy, Pitch) => 0xf304,
            (Self::Legacy, Roll) => 0xf305,
            (Self::Legacy, Yaw) => 0xf306,
            (Self::Legacy, TripOdometer) => 0xf307,
            (Self::Legacy, Rpm) => 0xf308,
            (Self::Legacy, Temperature) => 0xf309,
            (Self::Legacy, Current) => 0xf30b,
            (Self::Legacy, Voltage) => 0xf30c,
            (Self::Legacy, LifetimeOdometer) => 0xf30d,
            (Self::Extended, Pitch) => 0xf307,
            (Self::Extended, Roll) => 0xf308,
            (Self::Extended, Yaw) => 0xf309,
            (Self::Extended, TripOdometer) => 0xf30a,
            (Self::Extended, Rpm) => 0xf30b,
            (Self::Extended, Temperature) => 0xf310,
            (Self::Extended, Current) => 0xf312,
            (Self::Extended, Voltage) => 0xf316,
            (Self::Extended, LifetimeOdometer) => 0xf319,
        };
        board_uuid(short)
    }

    pub fn field_of(&self, uuid: Uuid) -> Option<TelemetryField> {
        use TelemetryField::*;
        const FIELDS: [TelemetryField; 11] = [
            BatteryPercent,
            Pitch,
            Roll,
            Yaw,
            Rpm,
            Temperature,
            Current,
            Voltage,
            TripOdometer,
            LifetimeOdometer,
            RideMode,
        ];
        FIELDS.into_iter().find(|f| self.uuid_of(*f) == uuid)
    }

    pub fn firmware_revision(&self) -> Uuid {
        match self {
            Self::Legacy => board_uuid(0xf30a),
            Self::Extended => board_uuid(0xf311),
        }
    }

    /// Challenge bytes arrive as notifications on this characteristic.
    pub fn read_channel(&self) -> Uuid {
        match self {
            Self::Legacy => board_uuid(0xf30e),
            Self::Extended => board_uuid(0xf3fe),
        }
    }

    /// Responses and unlock commands are written here.
    pub fn write_channel(&self) -> Uuid {
        match self {
            Self::Legacy => board_uuid(0xf30f),
            Self::Extended => board_uuid(0xf3ff),
        }
    }

    /// Characteristics read during the wake-up sweep, purely to prime the
    /// link. Individual read failures are ignored.
    pub fn wake_sweep(&self) -> [Uuid; 5] {
        [
            CHAR_SERIAL_NUMBER,
            CHAR_RIDE_MODE,
            CHAR_BATTERY_PERCENT,
            self.uuid_of(TelemetryField::Voltage),
            self.uuid_of(TelemetryField::Rpm),
        ]
    }

    /// Subscription order for GT-generation boards: these first, the rest
    /// afterwards.
    pub fn priority_subscriptions(&self) -> [Uuid; 6] {
        [
            CHAR_BATTERY_PERCENT,
            self.uuid_of(TelemetryField::Pitch),
            self.uuid_of(TelemetryField::Roll),
            self.uuid_of(TelemetryField::Voltage),
            self.uuid_of(TelemetryField::Rpm),
            self.read_channel(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Challenge-response engine

pub fn has_challenge_signature(challenge: &[u8]) -> bool {
    challenge.len() >= 3 && challenge[..3] == CHALLENGE_SIGNATURE
}

/// Portion of the challenge fed into MD5, ahead of the secret key.
///
/// Classic firmware hashes everything between the signature and the final
/// checksum byte. GT-generation firmware emits challenges of varying
/// length; the observed slicing schemes are selected by length, falling
/// back to the classic window for short frames.
pub fn challenge_digest_slice(challenge: &[u8], modified: bool) -> &[u8] {
    if modified {
        if challenge.len() >= 20 {
            return &challenge[3..19];
        }
        if challenge.len() >= 16 {
            return &challenge[4..16];
        }
    }
    &challenge[3..challenge.len() - 1]
}

/// Compute the unlock response for a challenge:
/// `CRX | MD5(slice ++ key) | XOR(signature ++ digest)`.
pub fn compute_unlock_response(
    challenge: &[u8],
    key: &[u8; 16],
    modified: bool,
) -> Result<Vec<u8>, BoardError> {
    if !has_challenge_signature(challenge) || challenge.len() < 4 {
        return Err(BoardError::InvalidChallengeSignature);
    }

    let mut hasher = Md5::new();
    hasher.update(challenge_digest_slice(challenge, modified));
    hasher.update(key);
    let digest = hasher.finalize();

    let mut response = Vec::with_capacity(RESPONSE_LEN);
    response.extend_from_slice(&CHALLENGE_SIGNATURE);
    response.extend_from_slice(&digest);
    let checksum = response.iter().fold(0u8, |acc, b| acc ^ b);
    response.push(checksum);
    Ok(response)
}

// ---------------------------------------------------------------------------
// Telemetry codec

/// One decoded telemetry reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryValue {
    BatteryPercent(f32),
    PitchDegrees(f32),
    RollDegrees(f32),
    YawDegrees(f32),
    Rpm(u16),
    TemperatureCelsius(f32),
    CurrentAmps(f32),
    VoltageVolts(f32),
    TripOdometerKm(f32),
    LifetimeOdometerKm(f32),
    RideMode(u16),
}

impl TelemetryValue {
    pub fn apply(self, snapshot: &mut TelemetrySnapshot) {
        match self {
            Self::BatteryPercent(v) => snapshot.battery_percent = v,
            Self::PitchDegrees(v) => snapshot.pitch = v,
            Self::RollDegrees(v) => snapshot.roll = v,
            Self::YawDegrees(v) => snapshot.yaw = v,
            Self::Rpm(v) => snapshot.rpm = v,
            Self::TemperatureCelsius(v) => snapshot.motor_temperature = v,
            Self::CurrentAmps(v) => snapshot.current = v,
            Self::VoltageVolts(v) => snapshot.voltage = v,
            Self::TripOdometerKm(v) => snapshot.trip_odometer_km = v,
            Self::LifetimeOdometerKm(v) => snapshot.lifetime_odometer_km = v,
            Self::RideMode(v) => snapshot.ride_mode = v,
        }
    }
}

/// Decode one characteristic payload. `None` when the payload is too short
/// for the field's encoding; a failed decode never affects other
/// characteristics.
pub fn decode_value(field: TelemetryField, data: &[u8]) -> Option<TelemetryValue> {
    use TelemetryField::*;
    Some(match field {
        BatteryPercent => TelemetryValue::BatteryPercent(*data.first()? as f32),
        Pitch => TelemetryValue::PitchDegrees(i16_le_scaled(data)?),
        Roll => TelemetryValue::RollDegrees(i16_le_scaled(data)?),
        Yaw => TelemetryValue::YawDegrees(i16_le_scaled(data)?),
        Rpm => TelemetryValue::Rpm(u16_le(data)?),
        Temperature => TelemetryValue::TemperatureCelsius(i16_le_scaled(data)?),
        Current => TelemetryValue::CurrentAmps(i16_le_scaled(data)?),
        Voltage => TelemetryValue::VoltageVolts(i16_le_scaled(data)?),
        TripOdometer => TelemetryValue::TripOdometerKm(u32_le_milli(data)?),
        LifetimeOdometer => TelemetryValue::LifetimeOdometerKm(u32_le_milli(data)?),
        RideMode => TelemetryValue::RideMode(u16_le(data)?),
    })
}

/// Decode a notification payload by characteristic identifier.
pub fn decode_characteristic(
    layout: CharacteristicLayout,
    uuid: Uuid,
    data: &[u8],
) -> Option<TelemetryValue> {
    decode_value(layout.field_of(uuid)?, data)
}

/// 2-byte signed little-endian, hundredths.
fn i16_le_scaled(data: &[u8]) -> Option<f32> {
    let raw = i16::from_le_bytes([*data.first()?, *data.get(1)?]);
    Some(raw as f32 / 100.0)
}

/// 2-byte unsigned little-endian, raw.
fn u16_le(data: &[u8]) -> Option<u16> {
    Some(u16::from_le_bytes([*data.first()?, *data.get(1)?]))
}

/// 4-byte unsigned little-endian, thousandths.
fn u32_le_milli(data: &[u8]) -> Option<f32> {
    let raw = u32::from_le_bytes([
        *data.first()?,
        *data.get(1)?,
        *data.get(2)?,
        *data.get(3)?,
    ]);
    Some(raw as f32 / 1000.0)
}
