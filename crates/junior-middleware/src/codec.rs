//! Wire codec for the vehicle's BLE characteristics.
//!
//! Outbound, a [`MotorCommand`] becomes four independent writes: each
//! magnitude as three-digit zero-padded ASCII (`"007"`, `"255"`) and each
//! direction as the literal text `True` / `False`.  Re-encoding the same
//! command yields the same bytes, so a retried write is harmless.
//!
//! Inbound, every telemetry field has a fixed [`Encoding`].

use junior_types::{
    Encoding, JuniorError, MotorCommand, TelemetryField, TelemetryReading, TelemetryValue,
};

const MODE_FORWARD: &[u8] = b"True";
const MODE_BACKWARD: &[u8] = b"False";

/// Which command characteristic a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandRole {
    MotorLeft,
    MotorRight,
    ModeLeft,
    ModeRight,
}

impl CommandRole {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandRole::MotorLeft => "motor_left",
            CommandRole::MotorRight => "motor_right",
            CommandRole::ModeLeft => "mode_left",
            CommandRole::ModeRight => "mode_right",
        }
    }
}

/// One characteristic write produced by [`encode_command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireWrite {
    pub role: CommandRole,
    pub bytes: Vec<u8>,
}

/// Encode a magnitude as three ASCII digits.
pub fn encode_magnitude(magnitude: u8) -> Vec<u8> {
    format!("{magnitude:03}").into_bytes()
}

/// Parse 1–3 ASCII digits back into a magnitude.
pub fn decode_magnitude(bytes: &[u8]) -> Result<u8, JuniorError> {
    let text = std::str::from_utf8(bytes).map_err(|e| decode_err("motor_magnitude", e))?;
    if text.is_empty() || text.len() > 3 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(decode_err(
            "motor_magnitude",
            format!("expected 1-3 ASCII digits, got {text:?}"),
        ));
    }
    text.parse::<u8>()
        .map_err(|_| decode_err("motor_magnitude", format!("{text} exceeds 255")))
}

pub fn encode_mode(forward: bool) -> Vec<u8> {
    if forward {
        MODE_FORWARD.to_vec()
    } else {
        MODE_BACKWARD.to_vec()
    }
}

pub fn decode_mode(bytes: &[u8]) -> Result<bool, JuniorError> {
    match bytes {
        MODE_FORWARD => Ok(true),
        MODE_BACKWARD => Ok(false),
        other => Err(decode_err(
            "motor_mode",
            format!("expected True/False, got {:?}", String::from_utf8_lossy(other)),
        )),
    }
}

/// The four writes for `command`, magnitudes first.
pub fn encode_command(command: &MotorCommand) -> [WireWrite; 4] {
    [
        WireWrite {
            role: CommandRole::MotorLeft,
            bytes: encode_magnitude(command.left),
        },
        WireWrite {
            role: CommandRole::MotorRight,
            bytes: encode_magnitude(command.right),
        },
        WireWrite {
            role: CommandRole::ModeLeft,
            bytes: encode_mode(command.left_forward),
        },
        WireWrite {
            role: CommandRole::ModeRight,
            bytes: encode_mode(command.right_forward),
        },
    ]
}

/// Decode a raw characteristic value for `field`.
///
/// # Errors
///
/// Returns [`JuniorError::Decode`] when the payload length or content does
/// not fit the field's encoding.
pub fn decode(field: TelemetryField, bytes: &[u8]) -> Result<TelemetryReading, JuniorError> {
    let value = match field.encoding() {
        Encoding::Float32Le => TelemetryValue::Float(decode_f32_le(field, bytes)?),
        Encoding::BoolByte => TelemetryValue::Flag(decode_bool_byte(field, bytes)?),
        Encoding::SignedIntLe => TelemetryValue::Integer(decode_signed_le(field, bytes)?),
    };
    Ok(TelemetryReading::new(field, value))
}

fn decode_f32_le(field: TelemetryField, bytes: &[u8]) -> Result<f32, JuniorError> {
    let raw: [u8; 4] = bytes.try_into().map_err(|_| {
        decode_err(field, format!("expected 4 bytes, got {}", bytes.len()))
    })?;
    Ok(f32::from_le_bytes(raw))
}

fn decode_bool_byte(field: TelemetryField, bytes: &[u8]) -> Result<bool, JuniorError> {
    match bytes {
        [b] => Ok(*b != 0),
        _ => Err(decode_err(
            field,
            format!("expected 1 byte, got {}", bytes.len()),
        )),
    }
}

fn decode_signed_le(field: TelemetryField, bytes: &[u8]) -> Result<i32, JuniorError> {
    let Some(&last) = bytes.last() else {
        return Err(decode_err(field, "empty payload"));
    };
    if bytes.len() > 8 {
        return Err(decode_err(
            field,
            format!("expected at most 8 bytes, got {}", bytes.len()),
        ));
    }
    // Sign-extend from the most significant byte.
    let mut wide = if last & 0x80 != 0 { [0xFF; 8] } else { [0x00; 8] };
    wide[..bytes.len()].copy_from_slice(bytes);
    let value = i64::from_le_bytes(wide);
    i32::try_from(value).map_err(|_| decode_err(field, format!("{value} does not fit in i32")))
}

/// Parse the HTTP firmware's response body: the ultrasonic distance as
/// decimal text.
pub fn parse_distance(body: &str) -> Result<f32, JuniorError> {
    let trimmed = body.trim();
    trimmed
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| decode_err(TelemetryField::UltrasonicDistance, format!("{trimmed:?} is not a number")))
}

fn decode_err(field: impl ToString, details: impl ToString) -> JuniorError {
    JuniorError::Decode {
        field: field.to_string(),
        details: details.to_string(),
    }
}
