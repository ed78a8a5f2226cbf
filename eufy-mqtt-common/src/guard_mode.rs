//! Station arming states
//!
//! Upstream stations report and accept a numeric guard mode. Only three of
//! the modes have an alarm panel equivalent; the rest (schedule, geofence,
//! custom modes) are surfaced as "no value".
//!
//! ```plain
//! AWAY     (0)  <-> armed_away
//! HOME     (1)  <-> armed_home
//! DISARMED (63) <-> disarmed
//! ```

use core::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardMode {
    Away,
    Home,
    Schedule,
    Custom1,
    Custom2,
    Custom3,
    Off,
    Geo,
    Disarmed,
}

impl GuardMode {
    pub const fn code(self) -> i64 {
        match self {
            GuardMode::Away => 0,
            GuardMode::Home => 1,
            GuardMode::Schedule => 2,
            GuardMode::Custom1 => 3,
            GuardMode::Custom2 => 4,
            GuardMode::Custom3 => 5,
            GuardMode::Off => 6,
            GuardMode::Geo => 47,
            GuardMode::Disarmed => 63,
        }
    }

    pub const fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => GuardMode::Away,
            1 => GuardMode::Home,
            2 => GuardMode::Schedule,
            3 => GuardMode::Custom1,
            4 => GuardMode::Custom2,
            5 => GuardMode::Custom3,
            6 => GuardMode::Off,
            47 => GuardMode::Geo,
            63 => GuardMode::Disarmed,
            _ => return None,
        })
    }

    pub const fn panel_state(self) -> Option<PanelState> {
        match self {
            GuardMode::Away => Some(PanelState::ArmedAway),
            GuardMode::Home => Some(PanelState::ArmedHome),
            GuardMode::Disarmed => Some(PanelState::Disarmed),
            _ => None,
        }
    }
}

impl Display for GuardMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            GuardMode::Away => "AWAY",
            GuardMode::Home => "HOME",
            GuardMode::Schedule => "SCHEDULE",
            GuardMode::Custom1 => "CUSTOM1",
            GuardMode::Custom2 => "CUSTOM2",
            GuardMode::Custom3 => "CUSTOM3",
            GuardMode::Off => "OFF",
            GuardMode::Geo => "GEO",
            GuardMode::Disarmed => "DISARMED",
        })
    }
}

/// Alarm panel state and command payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelState {
    ArmedAway,
    ArmedHome,
    Disarmed,
}

impl PanelState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PanelState::ArmedAway => "armed_away",
            PanelState::ArmedHome => "armed_home",
            PanelState::Disarmed => "disarmed",
        }
    }

    pub const fn guard_mode(self) -> GuardMode {
        match self {
            PanelState::ArmedAway => GuardMode::Away,
            PanelState::ArmedHome => GuardMode::Home,
            PanelState::Disarmed => GuardMode::Disarmed,
        }
    }
}

impl Display for PanelState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PanelState {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "armed_away" => Ok(PanelState::ArmedAway),
            "armed_home" => Ok(PanelState::ArmedHome),
            "disarmed" => Ok(PanelState::Disarmed),
            _ => Err(r#"must be either "armed_away", "armed_home", or "disarmed""#),
        }
    }
}
