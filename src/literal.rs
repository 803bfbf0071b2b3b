//! Typed argument literals for the command line.
//!
//! A literal is `kind:text` (`i2:1`, `bool:false`, `date:2024-01-31 12:00:00`) or bare text.
//! Bare text is read as an `i32`, then an `f64`, then `true`/`false`, and otherwise as a string.

use thiserror::Error;

use crate::error::AutomationError;
use crate::sys::{Currency, HResult};
use crate::variant::{date, Date, Empty, ErrorCode, Int, Null, UInt, Variant};

#[derive(Debug, Error)]
pub enum LiteralError {
    #[error("unknown literal kind `{0}`")]
    UnknownKind(String),

    #[error("`{text}` is not a valid {kind} literal")]
    Invalid { kind: &'static str, text: String },

    #[error(transparent)]
    Marshal(#[from] AutomationError),
}

fn invalid(kind: &'static str, text: &str) -> LiteralError {
    LiteralError::Invalid {
        kind,
        text: text.to_owned(),
    }
}

fn number<T: std::str::FromStr>(kind: &'static str, text: &str) -> Result<T, LiteralError> {
    text.trim().parse().map_err(|_| invalid(kind, text))
}

fn boolean(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "-1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Error literals take an HRESULT in hex (`0x80020004`) or decimal, or `missing`.
fn error_code(text: &str) -> Result<ErrorCode, LiteralError> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("missing") {
        return Ok(ErrorCode::MISSING);
    }
    let code = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).map(|code| code as i32).ok(),
        None => trimmed.parse::<i32>().ok(),
    };
    code.map(|code| ErrorCode::from(HResult(code)))
        .ok_or_else(|| invalid("error", text))
}

pub fn parse(literal: &str) -> Result<Variant, LiteralError> {
    let Some((kind, text)) = literal.split_once(':') else {
        return Ok(parse_bare(literal)?);
    };
    let value = match kind.to_ascii_lowercase().as_str() {
        "i1" => Variant::from_value(number::<i8>("i1", text)?)?,
        "ui1" => Variant::from_value(number::<u8>("ui1", text)?)?,
        "i2" => Variant::from_value(number::<i16>("i2", text)?)?,
        "ui2" => Variant::from_value(number::<u16>("ui2", text)?)?,
        "i4" => Variant::from_value(number::<i32>("i4", text)?)?,
        "ui4" => Variant::from_value(number::<u32>("ui4", text)?)?,
        "i8" => Variant::from_value(number::<i64>("i8", text)?)?,
        "ui8" => Variant::from_value(number::<u64>("ui8", text)?)?,
        "int" => Variant::from_value(Int::new(number("int", text)?))?,
        "uint" => Variant::from_value(UInt::new(number("uint", text)?))?,
        "r4" => Variant::from_value(number::<f32>("r4", text)?)?,
        "r8" => Variant::from_value(number::<f64>("r8", text)?)?,
        "cy" => {
            let amount = number::<f64>("cy", text)?;
            let currency = Currency::from_f64(amount).ok_or_else(|| invalid("cy", text))?;
            Variant::from_value(currency)?
        }
        "date" => {
            let ole = date::parse_ole_date(text).ok_or_else(|| invalid("date", text))?;
            Variant::from_value(Date::new(ole))?
        }
        "bool" => Variant::from_value(boolean(text).ok_or_else(|| invalid("bool", text))?)?,
        "error" => Variant::from_value(error_code(text)?)?,
        "str" => Variant::from_value(text)?,
        "null" => Variant::from_value(Null)?,
        "empty" => Variant::from_value(Empty)?,
        _ => return Ok(parse_bare(literal)?),
    };
    Ok(value)
}

fn parse_bare(text: &str) -> Result<Variant, AutomationError> {
    if let Ok(value) = text.parse::<i32>() {
        return Variant::from_value(value);
    }
    if let Ok(value) = text.parse::<f64>() {
        return Variant::from_value(value);
    }
    match text {
        "true" => Variant::from_value(true),
        "false" => Variant::from_value(false),
        _ => Variant::from_value(text),
    }
}

/// Parses every literal, stopping at the first bad one.
pub fn parse_all<'s, I: IntoIterator<Item = &'s str>>(literals: I) -> Result<Vec<Variant>, LiteralError> {
    literals.into_iter().map(parse).collect()
}
