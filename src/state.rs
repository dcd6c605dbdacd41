//! Robot state snapshots
//!
//! The controller reports its state as keyed STATUS sections. A snapshot
//! keeps the numeric codes alongside readable names so downstream output
//! needs no protocol knowledge.

use crate::{CriError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Number of axes reported by the controller (six robot + three external)
pub const AXIS_COUNT: usize = 9;

/// One state broadcast from the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    /// Active jog/motion mode reported by the controller
    pub mode: String,
    /// Joint setpoints (robot axes in degrees, external axes in mm or degrees)
    pub joints_setpoint: [f64; AXIS_COUNT],
    /// Measured joint positions
    pub joints_current: [f64; AXIS_COUNT],
    /// Cartesian pose of the flange [x, y, z, a, b, c] in mm and degrees
    pub position_robot: [f64; 6],
    /// Motion speed override in percent
    pub override_percent: f64,
    /// Digital input bitmask
    pub digital_in: u64,
    /// Digital output bitmask
    pub digital_out: u64,
    /// Emergency stop circuit triggered
    pub emergency_stop: bool,
    /// Supply voltage in volts
    pub supply_voltage: f64,
    /// Kinematics state code, see [`kinematics_state_name`]
    pub kinematics_state: i32,
    /// Operation mode code, see [`operation_mode_name`]
    pub operation_mode: i32,
    /// Cartesian speed of the flange in mm/s
    pub cart_speed: f64,
    /// Controller error word ("no_error" when healthy)
    pub error_state: String,
    /// Unix epoch seconds when this snapshot was received
    pub timestamp: f64,
    /// Count of STATUS broadcasts received on this session
    pub sequence: u64,
}

impl Default for RobotState {
    fn default() -> Self {
        Self {
            mode: "unknown".to_string(),
            joints_setpoint: [0.0; AXIS_COUNT],
            joints_current: [0.0; AXIS_COUNT],
            position_robot: [0.0; 6],
            override_percent: -1.0,
            digital_in: 0,
            digital_out: 0,
            emergency_stop: false,
            supply_voltage: -1.0,
            kinematics_state: -1,
            operation_mode: -1,
            cart_speed: 0.0,
            error_state: "unknown".to_string(),
            timestamp: 0.0,
            sequence: 0,
        }
    }
}

impl RobotState {
    /// Parse the body of a STATUS broadcast (everything after the keyword)
    ///
    /// Sections are keyed with fixed arity; unknown sections are skipped so
    /// newer controller firmware does not break older clients.
    pub(crate) fn from_status_body(body: &str) -> Result<Self> {
        let mut state = RobotState::default();
        let mut tokens = body.split_whitespace();

        while let Some(section) = tokens.next() {
            match section {
                "MODE" => state.mode = next_value(&mut tokens, section)?.to_string(),
                "POSJOINTSETPOINT" => {
                    state.joints_setpoint = take_floats(&mut tokens, section)?;
                }
                "POSJOINTCURRENT" => {
                    state.joints_current = take_floats(&mut tokens, section)?;
                }
                "POSCARTROBOT" => state.position_robot = take_floats(&mut tokens, section)?,
                "OVERRIDE" => state.override_percent = take_parsed(&mut tokens, section)?,
                "DIN" => state.digital_in = take_parsed(&mut tokens, section)?,
                "DOUT" => state.digital_out = take_parsed(&mut tokens, section)?,
                "ESTOP" => {
                    let value: u8 = take_parsed(&mut tokens, section)?;
                    state.emergency_stop = value != 0;
                }
                "SUPPLY" => state.supply_voltage = take_parsed(&mut tokens, section)?,
                "KINSTATE" => state.kinematics_state = take_parsed(&mut tokens, section)?,
                "OPMODE" => state.operation_mode = take_parsed(&mut tokens, section)?,
                "CARTSPEED" => state.cart_speed = take_parsed(&mut tokens, section)?,
                "ERROR" => state.error_state = next_value(&mut tokens, section)?.to_string(),
                other => trace!("Skipping unknown STATUS section {}", other),
            }
        }

        Ok(state)
    }
}

impl fmt::Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mode={} pose=[{:.1}, {:.1}, {:.1}, {:.1}, {:.1}, {:.1}] override={:.1}% \
             kinematics={} opmode={} estop={} error={}",
            self.mode,
            self.position_robot[0],
            self.position_robot[1],
            self.position_robot[2],
            self.position_robot[3],
            self.position_robot[4],
            self.position_robot[5],
            self.override_percent,
            kinematics_state_name(self.kinematics_state),
            operation_mode_name(self.operation_mode),
            self.emergency_stop,
            self.error_state,
        )
    }
}

fn next_value<'a>(tokens: &mut impl Iterator<Item = &'a str>, section: &str) -> Result<&'a str> {
    tokens.next().ok_or_else(|| {
        CriError::Protocol(format!("STATUS section {} is missing its value", section))
    })
}

fn take_parsed<'a, T: std::str::FromStr>(
    tokens: &mut impl Iterator<Item = &'a str>,
    section: &str,
) -> Result<T> {
    let token = next_value(tokens, section)?;
    token.parse().map_err(|_| {
        CriError::Protocol(format!(
            "STATUS section {} has a malformed value: {:?}",
            section, token
        ))
    })
}

fn take_floats<'a, const N: usize>(
    tokens: &mut impl Iterator<Item = &'a str>,
    section: &str,
) -> Result<[f64; N]> {
    let mut values = [0.0; N];
    for slot in values.iter_mut() {
        *slot = take_parsed(tokens, section)?;
    }
    Ok(values)
}

/// Readable name for a kinematics state code
pub fn kinematics_state_name(code: i32) -> String {
    match code {
        0 => "NO_ERROR".to_string(),
        1 => "JOINT_LIMIT_MIN".to_string(),
        2 => "JOINT_LIMIT_MAX".to_string(),
        3 => "SINGULARITY".to_string(),
        4 => "OUT_OF_REACH".to_string(),
        5 => "MOTION_NOT_ALLOWED".to_string(),
        _ => format!("UNKNOWN({})", code),
    }
}

/// Readable name for an operation mode code
pub fn operation_mode_name(code: i32) -> String {
    match code {
        -1 => "NOT_ENABLED".to_string(),
        0 => "JOINT".to_string(),
        1 => "CARTESIAN_BASE".to_string(),
        2 => "CARTESIAN_TOOL".to_string(),
        3 => "PROGRAM".to_string(),
        _ => format!("UNKNOWN({})", code),
    }
}
