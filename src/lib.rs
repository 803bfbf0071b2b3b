//! Typed VARIANT marshalling and late-bound `IDispatch` invocation.
//!
//! ```no_run
//! # #[cfg(windows)]
//! # fn main() -> autocom::Result<()> {
//! use autocom::{Apartment, ApartmentModel, Config, DispatchClient};
//!
//! let config = Config::default();
//! let _com = Apartment::enter(ApartmentModel::SingleThreaded)?;
//! let mut shell = DispatchClient::from_prog_id("WScript.Shell", &config)?;
//! shell.method("Run", ("notepad.exe", 1i16, false))?;
//! # Ok(())
//! # }
//! # #[cfg(not(windows))]
//! # fn main() {}
//! ```

pub mod args;
pub mod bstr;
pub mod com;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod literal;
pub mod ole;
pub mod safearray;
pub mod sys;
pub mod variant;

pub use crate::args::{ArgumentList, IntoArgument, IntoArguments, Out};
pub use crate::bstr::Bstr;
pub use crate::com::{Dispatch, Interface, Unknown};
pub use crate::config::{ActivationContext, ApartmentModel, Config};
#[cfg(windows)]
pub use crate::dispatch::{activate, Apartment};
pub use crate::dispatch::{AutomationObject, DispatchClient, Invocation, InvokeKind};
pub use crate::error::{AutomationError, Result, ServerError};
pub use crate::safearray::{ArrayElement, SafeArray};
pub use crate::sys::{Currency, Decimal, DispId, ExcepInfo, HResult, VarType};
pub use crate::variant::{
    kind, Date, Empty, ErrorCode, GetVariant, Int, Kind, Native, Null, RefTarget, Safe, SafeRef,
    SetVariant, UInt, Variant, VariantBool,
};
