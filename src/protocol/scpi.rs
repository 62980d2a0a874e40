//! SCPI command codec for the signal generator.
//!
//! A [`Header`] is the in-memory tag for one instrument parameter; its wire
//! literal lives in exactly one place ([`Header::wire`]) so the control flow
//! never matches on strings. A [`Command`] pairs a header with its payload and
//! knows how to render itself as a write and as the follow-up state query.

use std::fmt;

use crate::error::DeviceProtocolError;
use crate::protocol::units::FrequencyUnit;

pub const OPERATION_COMPLETE: &str = "*OPC?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModulationKind {
    Am,
    Fm,
    Pm,
}

impl ModulationKind {
    pub const ALL: [ModulationKind; 3] = [ModulationKind::Am, ModulationKind::Fm, ModulationKind::Pm];

    fn state_header(self) -> Header {
        match self {
            ModulationKind::Am => Header::AmState,
            ModulationKind::Fm => Header::FmState,
            ModulationKind::Pm => Header::PmState,
        }
    }

    fn source_header(self) -> Header {
        match self {
            ModulationKind::Am => Header::AmSource,
            ModulationKind::Fm => Header::FmSource,
            ModulationKind::Pm => Header::PmSource,
        }
    }

    fn coupling_header(self) -> Header {
        match self {
            ModulationKind::Am => Header::AmCoupling,
            ModulationKind::Fm => Header::FmCoupling,
            ModulationKind::Pm => Header::PmCoupling,
        }
    }

    fn frequency_header(self) -> Header {
        match self {
            ModulationKind::Am => Header::AmFrequency,
            ModulationKind::Fm => Header::FmFrequency,
            ModulationKind::Pm => Header::PmFrequency,
        }
    }
}

impl fmt::Display for ModulationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModulationKind::Am => "AM",
            ModulationKind::Fm => "FM",
            ModulationKind::Pm => "PM",
        })
    }
}

/// Argument keywords. `ON`/`OFF` are not listed here, switches carry a bool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Normal,
    Deep,
    High,
    Linear,
    Exponential,
    Internal,
    External,
    Ac,
    Dc,
}

impl Token {
    pub fn wire(self) -> &'static str {
        match self {
            Token::Normal => "NORM",
            Token::Deep => "DEEP",
            Token::High => "HIGH",
            Token::Linear => "LIN",
            Token::Exponential => "EXP",
            Token::Internal => "INT",
            Token::External => "EXT",
            Token::Ac => "AC",
            Token::Dc => "DC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Header {
    Identity,
    ClearStatus,
    RfOutput,
    Frequency,
    Power,
    ModulationState,
    AmState,
    AmType,
    AmMode,
    AmSource,
    AmCoupling,
    AmFrequency,
    AmLinearDepth,
    AmExpDepth,
    FmState,
    FmSource,
    FmCoupling,
    FmFrequency,
    FmDeviation,
    PmState,
    PmSource,
    PmCoupling,
    PmFrequency,
    PmDeviation,
    PmBandwidth,
}

/// How the state query for a header is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// No state query exists for this header.
    None,
    /// Passed through verbatim.
    Text,
    Number,
    /// `1`/`0` (or `ON`/`OFF`).
    Switch,
    /// One of two keywords; `yes` decodes to `true`.
    Choice { yes: Token, no: Token },
}

impl Header {
    pub const ALL: [Header; 25] = [
        Header::Identity,
        Header::ClearStatus,
        Header::RfOutput,
        Header::Frequency,
        Header::Power,
        Header::ModulationState,
        Header::AmState,
        Header::AmType,
        Header::AmMode,
        Header::AmSource,
        Header::AmCoupling,
        Header::AmFrequency,
        Header::AmLinearDepth,
        Header::AmExpDepth,
        Header::FmState,
        Header::FmSource,
        Header::FmCoupling,
        Header::FmFrequency,
        Header::FmDeviation,
        Header::PmState,
        Header::PmSource,
        Header::PmCoupling,
        Header::PmFrequency,
        Header::PmDeviation,
        Header::PmBandwidth,
    ];

    pub fn wire(self) -> &'static str {
        match self {
            Header::Identity => "*IDN",
            Header::ClearStatus => "*CLS",
            Header::RfOutput => ":OUTP:STAT",
            Header::Frequency => ":FREQ",
            Header::Power => ":POW",
            Header::ModulationState => ":OUTP:MOD:STAT",
            Header::AmState => ":AM:STAT",
            Header::AmType => ":AM:TYPE",
            Header::AmMode => ":AM:MODE",
            Header::AmSource => ":AM:SOUR",
            Header::AmCoupling => ":AM:EXT:COUP",
            Header::AmFrequency => ":AM:INT:FREQ",
            Header::AmLinearDepth => ":AM:DEPT:LIN",
            Header::AmExpDepth => ":AM:DEPT:EXP",
            Header::FmState => ":FM:STAT",
            Header::FmSource => ":FM:SOUR",
            Header::FmCoupling => ":FM:EXT:COUP",
            Header::FmFrequency => ":FM:INT:FREQ",
            Header::FmDeviation => ":FM:DEV",
            Header::PmState => ":PM:STAT",
            Header::PmSource => ":PM:SOUR",
            Header::PmCoupling => ":PM:EXT:COUP",
            Header::PmFrequency => ":PM:INT:FREQ",
            Header::PmDeviation => ":PM:DEV",
            Header::PmBandwidth => ":PM:BAND",
        }
    }

    /// Reverse lookup, case-insensitive.
    pub fn from_wire(text: &str) -> Option<Header> {
        Header::ALL
            .iter()
            .copied()
            .find(|h| h.wire().eq_ignore_ascii_case(text))
    }

    pub fn response(self) -> Response {
        match self {
            Header::ClearStatus => Response::None,
            Header::Identity => Response::Text,
            Header::RfOutput
            | Header::ModulationState
            | Header::AmState
            | Header::FmState
            | Header::PmState => Response::Switch,
            Header::Frequency
            | Header::Power
            | Header::AmFrequency
            | Header::AmLinearDepth
            | Header::AmExpDepth
            | Header::FmFrequency
            | Header::FmDeviation
            | Header::PmFrequency
            | Header::PmDeviation => Response::Number,
            Header::AmType => Response::Choice { yes: Token::Linear, no: Token::Exponential },
            Header::AmMode => Response::Choice { yes: Token::Normal, no: Token::Deep },
            Header::PmBandwidth => Response::Choice { yes: Token::Normal, no: Token::High },
            Header::AmSource | Header::FmSource | Header::PmSource => {
                Response::Choice { yes: Token::Internal, no: Token::External }
            }
            Header::AmCoupling | Header::FmCoupling | Header::PmCoupling => {
                Response::Choice { yes: Token::Dc, no: Token::Ac }
            }
        }
    }

    /// The modulation kind a per-kind header belongs to.
    pub fn modulation_kind(self) -> Option<ModulationKind> {
        match self {
            Header::AmState
            | Header::AmType
            | Header::AmMode
            | Header::AmSource
            | Header::AmCoupling
            | Header::AmFrequency
            | Header::AmLinearDepth
            | Header::AmExpDepth => Some(ModulationKind::Am),
            Header::FmState
            | Header::FmSource
            | Header::FmCoupling
            | Header::FmFrequency
            | Header::FmDeviation => Some(ModulationKind::Fm),
            Header::PmState
            | Header::PmSource
            | Header::PmCoupling
            | Header::PmFrequency
            | Header::PmDeviation
            | Header::PmBandwidth => Some(ModulationKind::Pm),
            _ => None,
        }
    }

    pub fn query(self) -> String {
        format!("{}?", self.wire())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    None,
    Switch(bool),
    Token(Token),
    Value(f64),
    Frequency(f64, FrequencyUnit),
    Dbm(f64),
}

/// One instrument command. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    header: Header,
    payload: Payload,
}

impl Command {
    pub fn new(header: Header, payload: Payload) -> Self {
        Self { header, payload }
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn payload(&self) -> Payload {
        self.payload
    }

    pub fn identify() -> Self {
        Self::new(Header::Identity, Payload::None)
    }

    pub fn clear_status() -> Self {
        Self::new(Header::ClearStatus, Payload::None)
    }

    pub fn rf_output(on: bool) -> Self {
        Self::new(Header::RfOutput, Payload::Switch(on))
    }

    pub fn frequency(value: f64, unit: FrequencyUnit) -> Self {
        Self::new(Header::Frequency, Payload::Frequency(value, unit))
    }

    /// Power is sent rounded to a thousandth of a dBm.
    pub fn power(dbm: f64) -> Self {
        Self::new(Header::Power, Payload::Dbm((dbm * 1000.0).round() / 1000.0))
    }

    pub fn modulation_state(on: bool) -> Self {
        Self::new(Header::ModulationState, Payload::Switch(on))
    }

    pub fn modulation_enable(kind: ModulationKind, on: bool) -> Self {
        Self::new(kind.state_header(), Payload::Switch(on))
    }

    pub fn source(kind: ModulationKind, internal: bool) -> Self {
        let token = if internal { Token::Internal } else { Token::External };
        Self::new(kind.source_header(), Payload::Token(token))
    }

    pub fn coupling(kind: ModulationKind, dc: bool) -> Self {
        let token = if dc { Token::Dc } else { Token::Ac };
        Self::new(kind.coupling_header(), Payload::Token(token))
    }

    pub fn modulation_frequency(kind: ModulationKind, value: f64, unit: FrequencyUnit) -> Self {
        Self::new(kind.frequency_header(), Payload::Frequency(value, unit))
    }

    pub fn am_type(linear: bool) -> Self {
        let token = if linear { Token::Linear } else { Token::Exponential };
        Self::new(Header::AmType, Payload::Token(token))
    }

    pub fn am_mode(normal: bool) -> Self {
        let token = if normal { Token::Normal } else { Token::Deep };
        Self::new(Header::AmMode, Payload::Token(token))
    }

    pub fn am_linear_depth(percent: f64) -> Self {
        Self::new(Header::AmLinearDepth, Payload::Value(percent))
    }

    pub fn am_exp_depth(db: f64) -> Self {
        Self::new(Header::AmExpDepth, Payload::Value(db))
    }

    pub fn fm_deviation(hz: f64) -> Self {
        Self::new(Header::FmDeviation, Payload::Value(hz))
    }

    pub fn pm_deviation(radians: f64) -> Self {
        Self::new(Header::PmDeviation, Payload::Value(radians))
    }

    pub fn pm_bandwidth(normal: bool) -> Self {
        let token = if normal { Token::Normal } else { Token::High };
        Self::new(Header::PmBandwidth, Payload::Token(token))
    }

    /// The write text, or `None` for query-only commands such as identity.
    pub fn encode(&self) -> Option<String> {
        let head = self.header.wire();
        match self.payload {
            Payload::None if self.header == Header::Identity => None,
            Payload::None => Some(head.to_string()),
            Payload::Switch(on) => Some(format!("{} {}", head, if on { "ON" } else { "OFF" })),
            Payload::Token(token) => Some(format!("{} {}", head, token.wire())),
            Payload::Value(v) => Some(format!("{} {}", head, v)),
            Payload::Frequency(v, unit) => Some(format!("{} {} {}", head, v, unit.wire())),
            Payload::Dbm(v) => Some(format!("{} {} dBm", head, v)),
        }
    }

    /// The state query issued after the write, if the header has one.
    pub fn query(&self) -> Option<String> {
        match self.header.response() {
            Response::None => None,
            _ => Some(self.header.query()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Some(text) => f.write_str(&text),
            None => f.write_str(&self.header.query()),
        }
    }
}

/// A decoded state-query response.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Text(String),
    Number(f64),
    Flag(bool),
}

/// Decodes the response to `header`'s state query.
///
/// Never panics on malformed device text; anything unexpected comes back
/// as a [`DeviceProtocolError`].
pub fn decode(header: Header, text: &str) -> Result<Reading, DeviceProtocolError> {
    let trimmed = text.trim().trim_matches('"');
    let query = header.query();

    match header.response() {
        Response::None | Response::Text => Ok(Reading::Text(trimmed.to_string())),
        _ if trimmed.is_empty() => Err(DeviceProtocolError::EmptyResponse { query }),
        Response::Number => trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Reading::Number)
            .ok_or_else(|| DeviceProtocolError::BadNumber {
                query,
                text: trimmed.to_string(),
            }),
        Response::Switch => match trimmed.to_ascii_uppercase().as_str() {
            "1" | "ON" => Ok(Reading::Flag(true)),
            "0" | "OFF" => Ok(Reading::Flag(false)),
            _ => Err(DeviceProtocolError::UnknownToken {
                query,
                text: trimmed.to_string(),
            }),
        },
        Response::Choice { yes, no } => {
            // the instrument may answer in long form ("INT1", "NORMal")
            let upper = trimmed.to_ascii_uppercase();
            if upper.starts_with(yes.wire()) {
                Ok(Reading::Flag(true))
            } else if upper.starts_with(no.wire()) {
                Ok(Reading::Flag(false))
            } else {
                Err(DeviceProtocolError::UnknownToken {
                    query,
                    text: trimmed.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_encodes_value_and_unit() {
        let cmd = Command::frequency(915.0, FrequencyUnit::MHz);
        assert_eq!(cmd.encode().as_deref(), Some(":FREQ 915 MHz"));
        assert_eq!(cmd.query().as_deref(), Some(":FREQ?"));
    }

    #[test]
    fn test_power_is_rounded_and_suffixed() {
        let cmd = Command::power(-12.34567);
        assert_eq!(cmd.encode().as_deref(), Some(":POW -12.346 dBm"));
    }

    #[test]
    fn test_switch_and_token_payloads() {
        assert_eq!(Command::rf_output(true).encode().as_deref(), Some(":OUTP:STAT ON"));
        assert_eq!(Command::rf_output(false).encode().as_deref(), Some(":OUTP:STAT OFF"));
        assert_eq!(
            Command::source(ModulationKind::Fm, false).encode().as_deref(),
            Some(":FM:SOUR EXT")
        );
        assert_eq!(
            Command::coupling(ModulationKind::Pm, true).encode().as_deref(),
            Some(":PM:EXT:COUP DC")
        );
        assert_eq!(Command::am_type(true).encode().as_deref(), Some(":AM:TYPE LIN"));
        assert_eq!(Command::pm_bandwidth(false).encode().as_deref(), Some(":PM:BAND HIGH"));
    }

    #[test]
    fn test_identity_is_query_only() {
        let cmd = Command::identify();
        assert_eq!(cmd.encode(), None);
        assert_eq!(cmd.query().as_deref(), Some("*IDN?"));
    }

    #[test]
    fn test_clear_status_has_no_query() {
        let cmd = Command::clear_status();
        assert_eq!(cmd.encode().as_deref(), Some("*CLS"));
        assert_eq!(cmd.query(), None);
    }

    #[test]
    fn test_wire_table_round_trips() {
        for header in Header::ALL {
            assert_eq!(Header::from_wire(header.wire()), Some(header));
        }
        assert_eq!(Header::from_wire(":freq"), Some(Header::Frequency));
        assert_eq!(Header::from_wire(":NOPE"), None);
    }

    #[test]
    fn test_decode_switch() {
        assert_eq!(decode(Header::RfOutput, "1\n"), Ok(Reading::Flag(true)));
        assert_eq!(decode(Header::RfOutput, "0"), Ok(Reading::Flag(false)));
        assert_eq!(decode(Header::AmState, "ON"), Ok(Reading::Flag(true)));
        assert!(matches!(
            decode(Header::RfOutput, "maybe"),
            Err(DeviceProtocolError::UnknownToken { .. })
        ));
    }

    #[test]
    fn test_decode_number_scientific() {
        assert_eq!(decode(Header::Frequency, "+9.15000000000E+08"), Ok(Reading::Number(915e6)));
        assert_eq!(decode(Header::Power, "-1.0E+01"), Ok(Reading::Number(-10.0)));
    }

    #[test]
    fn test_decode_bad_number_is_protocol_error() {
        match decode(Header::Power, "garbage") {
            Err(DeviceProtocolError::BadNumber { query, text }) => {
                assert_eq!(query, ":POW?");
                assert_eq!(text, "garbage");
            }
            other => panic!("expected BadNumber, got {:?}", other),
        }
        assert!(matches!(
            decode(Header::Power, "  "),
            Err(DeviceProtocolError::EmptyResponse { .. })
        ));
        assert!(decode(Header::Power, "NaN").is_err());
    }

    #[test]
    fn test_decode_choice_accepts_long_form() {
        assert_eq!(decode(Header::AmSource, "INT1"), Ok(Reading::Flag(true)));
        assert_eq!(decode(Header::AmSource, "EXT"), Ok(Reading::Flag(false)));
        assert_eq!(decode(Header::AmType, "EXP"), Ok(Reading::Flag(false)));
        assert_eq!(decode(Header::FmCoupling, "dc"), Ok(Reading::Flag(true)));
        assert!(decode(Header::AmMode, "HIGH").is_err());
    }

    #[test]
    fn test_decode_identity_passthrough() {
        let idn = "Agilent Technologies, N5181A, MY123, A.01.80";
        assert_eq!(decode(Header::Identity, idn), Ok(Reading::Text(idn.into())));
    }

    #[test]
    fn test_header_kinds() {
        assert_eq!(Header::PmBandwidth.modulation_kind(), Some(ModulationKind::Pm));
        assert_eq!(Header::AmExpDepth.modulation_kind(), Some(ModulationKind::Am));
        assert_eq!(Header::Power.modulation_kind(), None);
    }
}
