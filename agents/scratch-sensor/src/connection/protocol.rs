//! Message Protocol
//!
//! Defines the two commands exchanged with Scratch and their textual wire
//! syntax:
//!
//! ```text
//! broadcast "<message>"
//! sensor-update "<name>" <value> ["<name>" <value> ...]
//! ```
//!
//! Quoted strings escape `"` and `\` with a backslash. Values are either a
//! quoted string or a bare decimal number.

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::{Error, ParseError};

const BROADCAST: &str = "broadcast";
const SENSOR_UPDATE: &str = "sensor-update";

/// A sensor value: a double-precision number or a string
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Text(String),
}

impl SensorValue {
    /// Numeric view of the value, if it is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Number(n) => Some(*n),
            SensorValue::Text(_) => None,
        }
    }

    /// String view of the value, if it is text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SensorValue::Number(_) => None,
            SensorValue::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Shortest representation that parses back to the same f64
            SensorValue::Number(n) => write!(f, "{}", n),
            SensorValue::Text(s) => write_quoted(f, s),
        }
    }
}

impl From<f64> for SensorValue {
    fn from(value: f64) -> Self {
        SensorValue::Number(value)
    }
}

impl From<f32> for SensorValue {
    fn from(value: f32) -> Self {
        SensorValue::Number(f64::from(value))
    }
}

impl From<i32> for SensorValue {
    fn from(value: i32) -> Self {
        SensorValue::Number(f64::from(value))
    }
}

impl From<u32> for SensorValue {
    fn from(value: u32) -> Self {
        SensorValue::Number(f64::from(value))
    }
}

impl From<&str> for SensorValue {
    fn from(value: &str) -> Self {
        SensorValue::Text(value.to_string())
    }
}

impl From<String> for SensorValue {
    fn from(value: String) -> Self {
        SensorValue::Text(value)
    }
}

/// An ordered, non-empty batch of uniquely named sensor values
#[derive(Debug, Clone, PartialEq)]
pub struct SensorUpdate {
    entries: Vec<(String, SensorValue)>,
}

impl SensorUpdate {
    /// Build a sensor update, preserving the order of `entries`.
    ///
    /// Fails if there are no entries, a name repeats, or a number is not finite.
    pub fn new<I, K, V>(entries: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SensorValue>,
    {
        let mut collected: Vec<(String, SensorValue)> = Vec::new();
        for (name, value) in entries {
            let name = name.into();
            let value = value.into();
            if collected.iter().any(|(n, _)| *n == name) {
                return Err(Error::InvalidCommand(format!(
                    "sensor `{}` appears more than once",
                    name
                )));
            }
            if let SensorValue::Number(n) = value {
                if !n.is_finite() {
                    return Err(Error::InvalidCommand(format!(
                        "sensor `{}` has non-finite value {}",
                        name, n
                    )));
                }
            }
            collected.push((name, value));
        }

        if collected.is_empty() {
            return Err(Error::InvalidCommand(
                "sensor-update needs at least one entry".to_string(),
            ));
        }

        Ok(Self { entries: collected })
    }

    /// Look up a value by sensor name
    pub fn get(&self, name: &str) -> Option<&SensorValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Iterate entries in wire order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SensorValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<(String, SensorValue)> {
        self.entries
    }
}

impl Serialize for SensorUpdate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A single remote sensor protocol command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// A named event delivered to every listener
    Broadcast(String),

    /// A batch of sensor values
    SensorUpdate(SensorUpdate),
}

impl Command {
    /// Create a broadcast command
    pub fn broadcast(message: impl Into<String>) -> Self {
        Command::Broadcast(message.into())
    }

    /// Create a sensor-update command, see [`SensorUpdate::new`]
    pub fn sensor_update<I, K, V>(entries: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SensorValue>,
    {
        SensorUpdate::new(entries).map(Command::SensorUpdate)
    }

    /// Short name of the command kind, as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Broadcast(_) => BROADCAST,
            Command::SensorUpdate(_) => SENSOR_UPDATE,
        }
    }

    /// Render the command text sent inside a frame
    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    /// Parse a frame payload
    pub fn from_bytes(payload: &[u8]) -> Result<Self, ParseError> {
        std::str::from_utf8(payload)
            .map_err(|_| ParseError::InvalidUtf8)?
            .parse()
    }

    /// Parse command text
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut tokens = tokenize(text)?.into_iter();

        let kind = match tokens.next() {
            Some(Token::Bare(word)) => word,
            Some(Token::Quoted(word)) => return Err(ParseError::UnknownKind(word)),
            None => return Err(ParseError::Empty),
        };

        match kind.as_str() {
            BROADCAST => parse_broadcast(tokens.collect()),
            SENSOR_UPDATE => parse_sensor_update(tokens),
            _ => Err(ParseError::UnknownKind(kind)),
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Broadcast(message) => {
                write!(f, "{} ", BROADCAST)?;
                write_quoted(f, message)
            }
            Command::SensorUpdate(update) => {
                f.write_str(SENSOR_UPDATE)?;
                for (name, value) in update.iter() {
                    f.write_str(" ")?;
                    write_quoted(f, name)?;
                    write!(f, " {}", value)?;
                }
                Ok(())
            }
        }
    }
}

fn parse_broadcast(args: Vec<Token>) -> Result<Command, ParseError> {
    match <[Token; 1]>::try_from(args) {
        Ok([Token::Quoted(message)]) => Ok(Command::Broadcast(message)),
        Ok([Token::Bare(word)]) => Err(ParseError::ExpectedQuoted(word)),
        Err(args) => Err(ParseError::BroadcastArity(args.len())),
    }
}

fn parse_sensor_update(mut tokens: impl Iterator<Item = Token>) -> Result<Command, ParseError> {
    let mut entries: Vec<(String, SensorValue)> = Vec::new();

    while let Some(token) = tokens.next() {
        let name = match token {
            Token::Quoted(name) => name,
            Token::Bare(word) => return Err(ParseError::ExpectedQuoted(word)),
        };
        let value = match tokens.next() {
            Some(Token::Quoted(text)) => SensorValue::Text(text),
            Some(Token::Bare(word)) => SensorValue::Number(parse_number(&word)?),
            None => return Err(ParseError::MissingValue(name)),
        };
        if entries.iter().any(|(n, _)| *n == name) {
            return Err(ParseError::DuplicateName(name));
        }
        entries.push((name, value));
    }

    if entries.is_empty() {
        return Err(ParseError::NoEntries);
    }
    Ok(Command::SensorUpdate(SensorUpdate { entries }))
}

fn parse_number(word: &str) -> Result<f64, ParseError> {
    match word.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(ParseError::InvalidNumber(word.to_string())),
    }
}

/// Lexical unit of command text
#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Unquoted run of non-whitespace characters
    Bare(String),
    /// Contents of a double-quoted string, unescaped
    Quoted(String),
}

fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        if ch.is_ascii_whitespace() {
            chars.next();
            continue;
        }

        if ch == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some((_, esc @ ('"' | '\\'))) => value.push(esc),
                        Some((_, other)) => {
                            value.push('\\');
                            value.push(other);
                        }
                        None => break,
                    },
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(ParseError::UnbalancedQuote(start));
            }
            // A closing quote must end the token
            if let Some(&(pos, next)) = chars.peek() {
                if !next.is_ascii_whitespace() {
                    return Err(ParseError::UnexpectedCharacter { ch: next, pos });
                }
            }
            tokens.push(Token::Quoted(value));
            continue;
        }

        let mut word = String::new();
        while let Some(&(pos, c)) = chars.peek() {
            if c.is_ascii_whitespace() {
                break;
            }
            if c == '"' {
                return Err(ParseError::UnexpectedCharacter { ch: c, pos });
            }
            word.push(c);
            chars.next();
        }
        tokens.push(Token::Bare(word));
    }

    Ok(tokens)
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        if c == '"' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{}", c)?;
    }
    f.write_str("\"")
}
