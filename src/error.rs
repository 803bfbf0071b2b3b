use std::fmt;

use thiserror::Error;

use crate::sys::{DispId, HResult, VarType};

/// Everything that can go wrong while marshalling or invoking.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// A local tag coercion could not be performed.
    #[error("cannot convert {from} to {to} (VariantChangeType returned {code})")]
    Coercion { from: VarType, to: VarType, code: HResult },

    /// Name resolution failed; nothing was marshalled or invoked.
    #[error("member `{name}` could not be resolved ({code})")]
    MemberNotFound { name: String, code: HResult },

    /// `IDispatch::Invoke` failed at the ABI level.
    #[error("invoking dispid {dispid} failed with {code}{}", arg_suffix(.arg_err))]
    Invocation {
        dispid: DispId,
        code: HResult,
        arg_err: Option<u32>,
    },

    /// The server raised an exception and filled in `EXCEPINFO`.
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("allocation of {what} failed")]
    Allocation { what: &'static str },

    #[error("could not activate `{target}` ({code})")]
    Activation { target: String, code: HResult },
}

fn arg_suffix(arg_err: &Option<u32>) -> String {
    match arg_err {
        Some(index) => format!(" at argument {index}"),
        None => String::new(),
    }
}

impl AutomationError {
    pub(crate) fn coercion(from: VarType, to: VarType, code: HResult) -> Self {
        AutomationError::Coercion { from, to, code }
    }

    pub(crate) fn mismatch(from: VarType, to: VarType) -> Self {
        AutomationError::coercion(from, to, HResult::DISP_E_TYPEMISMATCH)
    }

    /// The status code behind this error, when there is one.
    pub fn hresult(&self) -> Option<HResult> {
        match self {
            AutomationError::Coercion { code, .. }
            | AutomationError::MemberNotFound { code, .. }
            | AutomationError::Invocation { code, .. }
            | AutomationError::Activation { code, .. } => Some(*code),
            AutomationError::Server(server) => Some(server.code),
            AutomationError::Allocation { .. } => Some(HResult::E_OUTOFMEMORY),
        }
    }
}

/// Server-side failure details taken from `EXCEPINFO`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerError {
    pub code: HResult,
    pub source: String,
    pub description: String,
    pub help_file: String,
    pub help_context: u32,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server exception {}", self.code)?;
        if !self.source.is_empty() {
            write!(f, " from {}", self.source)?;
        }
        if !self.description.is_empty() {
            write!(f, ": {}", self.description)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}

pub type Result<T, E = AutomationError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_message_includes_argument() {
        let err = AutomationError::Invocation {
            dispid: 7,
            code: HResult::DISP_E_TYPEMISMATCH,
            arg_err: Some(1),
        };
        assert_eq!(
            err.to_string(),
            "invoking dispid 7 failed with 0x80020005 at argument 1"
        );
    }

    #[test]
    fn test_server_error_display() {
        let err = AutomationError::from(ServerError {
            code: HResult::E_FAIL,
            source: "WshShell.Run".into(),
            description: "The system cannot find the file specified.".into(),
            ..Default::default()
        });
        assert_eq!(
            err.to_string(),
            "server exception 0x80004005 from WshShell.Run: The system cannot find the file specified."
        );
        assert_eq!(err.hresult(), Some(HResult::E_FAIL));
    }
}
