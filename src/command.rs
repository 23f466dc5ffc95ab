// Text command grammar
//
//   stop | stopTracks | stopBase | <component>:<speed>
//
// Parsing is pure (`Command::parse`); applying a parsed command is the only
// place target speeds are ever written (`Command::apply`).

use tracing::debug;

use crate::config::MAX_SPEED;
use crate::state::{Actuator, TargetSpeeds};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// No stop keyword and no ':' separator
    #[error("MALFORMED COMMAND --- NO \":\" GIVEN")]
    Malformed { msg: String },

    /// Unknown component, or an empty / out-of-range speed
    #[error("INVALID COMMAND --- {msg}")]
    Invalid { msg: String },
}

/// Target of a `<component>:<speed>` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    LeftTrack,
    RightTrack,
    Base,
    Forward,
    TurnRight,
    TurnLeft,
}

impl Component {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "leftTrack" => Some(Self::LeftTrack),
            "rightTrack" => Some(Self::RightTrack),
            "base" => Some(Self::Base),
            "forward" => Some(Self::Forward),
            "turnRight" => Some(Self::TurnRight),
            "turnLeft" => Some(Self::TurnLeft),
            _ => None,
        }
    }

    /// Targets this component writes: (actuator, takes the commanded speed).
    /// Actuators that don't take the speed are forced to 0.
    fn updates(self) -> &'static [(Actuator, bool)] {
        match self {
            Self::LeftTrack => &[(Actuator::LeftTrack, true)],
            Self::RightTrack => &[(Actuator::RightTrack, true)],
            Self::Base => &[(Actuator::Base, true)],
            Self::Forward => &[(Actuator::LeftTrack, true), (Actuator::RightTrack, true)],
            Self::TurnRight => &[(Actuator::LeftTrack, true), (Actuator::RightTrack, false)],
            Self::TurnLeft => &[(Actuator::LeftTrack, false), (Actuator::RightTrack, true)],
        }
    }

    fn ack_kind(self) -> AckKind {
        match self {
            Self::LeftTrack => AckKind::LeftTrack,
            Self::RightTrack => AckKind::RightTrack,
            Self::Base => AckKind::Base,
            Self::Forward => AckKind::Forward,
            Self::TurnRight | Self::TurnLeft => AckKind::Turn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Stop,
    StopTracks,
    StopBase,
    Set { component: Component, speed: i16 },
}

/// Which rule accepted a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Stop,
    LeftTrack,
    RightTrack,
    Base,
    Forward,
    Turn,
}

impl AckKind {
    fn label(self) -> &'static str {
        match self {
            AckKind::Stop => "STOP",
            AckKind::LeftTrack => "LEFT TRACK",
            AckKind::RightTrack => "RIGHT TRACK",
            AckKind::Base => "BASE",
            AckKind::Forward => "FORWARD",
            AckKind::Turn => "TURN",
        }
    }
}

/// Acknowledgment of an accepted command, echoing the original message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub kind: AckKind,
    pub msg: String,
}

impl std::fmt::Display for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VALID {} COMMAND --- {}", self.kind.label(), self.msg)
    }
}

impl Command {
    pub fn parse(msg: &str) -> Result<Self, CommandError> {
        match msg {
            "stop" => return Ok(Self::Stop),
            "stopTracks" => return Ok(Self::StopTracks),
            "stopBase" => return Ok(Self::StopBase),
            _ => {}
        }

        let Some((name, speed_str)) = msg.split_once(':') else {
            return Err(CommandError::Malformed {
                msg: msg.to_string(),
            });
        };
        let speed_str = speed_str.trim();
        let speed = parse_speed(speed_str);
        debug!("Parsed command: component={:?}, speed={}", name, speed);

        let invalid = || CommandError::Invalid {
            msg: msg.to_string(),
        };
        if speed_str.is_empty() || !(-(MAX_SPEED as i32)..=MAX_SPEED as i32).contains(&speed) {
            return Err(invalid());
        }
        let component = Component::from_name(name).ok_or_else(invalid)?;

        Ok(Self::Set {
            component,
            speed: speed as i16,
        })
    }

    /// Write this command into the shared targets
    pub fn apply(&self, targets: &TargetSpeeds) -> AckKind {
        match *self {
            Self::Stop => {
                targets.zero_all();
                AckKind::Stop
            }
            Self::StopTracks => {
                targets.set(Actuator::LeftTrack, 0);
                targets.set(Actuator::RightTrack, 0);
                AckKind::Stop
            }
            Self::StopBase => {
                targets.set(Actuator::Base, 0);
                AckKind::Stop
            }
            Self::Set { component, speed } => {
                for &(actuator, takes_speed) in component.updates() {
                    targets.set(actuator, if takes_speed { speed } else { 0 });
                }
                component.ack_kind()
            }
        }
    }
}

/// Parse, validate and apply one inbound text message
pub fn interpret(msg: &str, targets: &TargetSpeeds) -> Result<Ack, CommandError> {
    let command = Command::parse(msg)?;
    let kind = command.apply(targets);
    Ok(Ack {
        kind,
        msg: msg.to_string(),
    })
}

/// Lenient decimal parse: optional leading whitespace and sign, then digits
/// up to the first non-digit. No digits parses as 0. Saturates instead of
/// wrapping so huge values stay out of range.
fn parse_speed(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i32, |acc, d| acc.saturating_mul(10).saturating_add((d - b'0') as i32));
    if negative { -magnitude } else { magnitude }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets_with(left: i16, right: i16, base: i16) -> TargetSpeeds {
        let targets = TargetSpeeds::new();
        targets.set(Actuator::LeftTrack, left);
        targets.set(Actuator::RightTrack, right);
        targets.set(Actuator::Base, base);
        targets
    }

    #[test]
    fn test_speed_boundaries() {
        let targets = TargetSpeeds::new();
        assert!(interpret("leftTrack:255", &targets).is_ok());
        assert_eq!(targets.get(Actuator::LeftTrack), 255);
        assert!(interpret("leftTrack:-255", &targets).is_ok());
        assert_eq!(targets.get(Actuator::LeftTrack), -255);

        assert!(matches!(
            interpret("leftTrack:256", &targets),
            Err(CommandError::Invalid { .. })
        ));
        assert!(matches!(
            interpret("leftTrack:-256", &targets),
            Err(CommandError::Invalid { .. })
        ));
        assert_eq!(targets.get(Actuator::LeftTrack), -255);
    }

    #[test]
    fn test_empty_speed_is_invalid() {
        let targets = targets_with(40, 0, 0);
        assert!(matches!(
            interpret("leftTrack:", &targets),
            Err(CommandError::Invalid { .. })
        ));
        assert!(matches!(
            interpret("leftTrack:   ", &targets),
            Err(CommandError::Invalid { .. })
        ));
        assert_eq!(targets.get(Actuator::LeftTrack), 40);
    }

    #[test]
    fn test_unknown_component_is_invalid() {
        let targets = TargetSpeeds::new();
        let err = interpret("leftTrackFoo:10", &targets).unwrap_err();
        assert_eq!(err.to_string(), "INVALID COMMAND --- leftTrackFoo:10");
        assert_eq!(targets.snapshot(), [0, 0, 0]);
    }

    #[test]
    fn test_missing_separator_is_malformed() {
        let targets = TargetSpeeds::new();
        let err = interpret("leftTrack10", &targets).unwrap_err();
        assert!(matches!(err, CommandError::Malformed { .. }));
        assert_eq!(err.to_string(), "MALFORMED COMMAND --- NO \":\" GIVEN");
    }

    #[test]
    fn test_stop_keywords_are_exact_and_case_sensitive() {
        assert_eq!(Command::parse("stop"), Ok(Command::Stop));
        assert!(matches!(Command::parse("Stop"), Err(CommandError::Malformed { .. })));
        assert!(matches!(Command::parse(" stop"), Err(CommandError::Malformed { .. })));
        assert!(matches!(Command::parse("stop:0"), Err(CommandError::Invalid { .. })));
        assert!(matches!(Command::parse("LeftTrack:10"), Err(CommandError::Invalid { .. })));
    }

    #[test]
    fn test_component_effects() {
        let targets = targets_with(10, 20, 30);
        interpret("forward:100", &targets).unwrap();
        assert_eq!(targets.snapshot(), [100, 100, 30]);

        interpret("turnRight:80", &targets).unwrap();
        assert_eq!(targets.snapshot(), [80, 0, 30]);

        interpret("turnLeft:-70", &targets).unwrap();
        assert_eq!(targets.snapshot(), [0, -70, 30]);

        interpret("rightTrack:15", &targets).unwrap();
        assert_eq!(targets.snapshot(), [0, 15, 30]);

        interpret("base:-255", &targets).unwrap();
        assert_eq!(targets.snapshot(), [0, 15, -255]);
    }

    #[test]
    fn test_stop_variants() {
        let targets = targets_with(100, -100, 200);
        interpret("stopBase", &targets).unwrap();
        assert_eq!(targets.snapshot(), [100, -100, 0]);

        let targets = targets_with(100, -100, 200);
        interpret("stopTracks", &targets).unwrap();
        assert_eq!(targets.snapshot(), [0, 0, 200]);

        let targets = targets_with(100, -100, 200);
        interpret("stop", &targets).unwrap();
        assert_eq!(targets.snapshot(), [0, 0, 0]);
    }

    #[test]
    fn test_ack_text_identifies_rule() {
        let targets = TargetSpeeds::new();
        let cases = [
            ("stop", "VALID STOP COMMAND --- stop"),
            ("stopTracks", "VALID STOP COMMAND --- stopTracks"),
            ("leftTrack:5", "VALID LEFT TRACK COMMAND --- leftTrack:5"),
            ("rightTrack:5", "VALID RIGHT TRACK COMMAND --- rightTrack:5"),
            ("base:5", "VALID BASE COMMAND --- base:5"),
            ("forward:5", "VALID FORWARD COMMAND --- forward:5"),
            ("turnLeft:5", "VALID TURN COMMAND --- turnLeft:5"),
        ];
        for (msg, expected) in cases {
            assert_eq!(interpret(msg, &targets).unwrap().to_string(), expected);
        }
    }

    #[test]
    fn test_lenient_speed_parsing() {
        assert_eq!(parse_speed("120"), 120);
        assert_eq!(parse_speed("-45"), -45);
        assert_eq!(parse_speed("+7"), 7);
        assert_eq!(parse_speed("12abc"), 12);
        assert_eq!(parse_speed("abc"), 0);
        assert_eq!(parse_speed("-"), 0);
        assert_eq!(parse_speed("99999999999999"), i32::MAX);
    }

    #[test]
    fn test_non_numeric_speed_is_zero_but_accepted() {
        let targets = targets_with(90, 0, 0);
        interpret("leftTrack:abc", &targets).unwrap();
        assert_eq!(targets.get(Actuator::LeftTrack), 0);
    }

    #[test]
    fn test_whitespace_around_speed_is_trimmed() {
        let targets = TargetSpeeds::new();
        interpret("base: -90 ", &targets).unwrap();
        assert_eq!(targets.get(Actuator::Base), -90);
    }

    #[test]
    fn test_parse_is_pure() {
        assert_eq!(Command::parse("forward:42"), Command::parse("forward:42"));
        assert_eq!(
            Command::parse("forward:42"),
            Ok(Command::Set {
                component: Component::Forward,
                speed: 42
            })
        );
    }
}
