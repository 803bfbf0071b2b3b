//! OLE automation primitives the marshalling layer relies on but does not own.
//!
//! On Windows everything forwards to oleaut32 through the `windows` crate. Elsewhere an
//! in-process stand-in provides the same contracts (BSTR allocation, tag coercion, SAFEARRAY
//! lifetime) so the rest of the crate can be exercised without a COM runtime.

#[cfg(windows)]
mod win32;
#[cfg(windows)]
pub(crate) use self::win32::*;

#[cfg(not(windows))]
mod host;
#[cfg(not(windows))]
pub(crate) use self::host::{
    alloc_string, array_vartype, change_type, clear_foreign, copy_array, create_vector,
    destroy_array, free_string, string_len,
};
#[cfg(not(windows))]
pub use self::host::{live_resources, LiveResources};

use crate::error::{AutomationError, Result};

/// Duplicates a UTF-16 slice into a freshly allocated BSTR.
pub(crate) fn alloc_string_checked(units: &[u16]) -> Result<*mut u16> {
    // SAFETY: the slice is valid for reads of its length.
    let text = unsafe { alloc_string(units) }
        .map_err(|_| AutomationError::Allocation { what: "BSTR" })?;
    if text.is_null() && !units.is_empty() {
        return Err(AutomationError::Allocation { what: "BSTR" });
    }
    Ok(text)
}

/// Borrows the characters of a BSTR. A null BSTR is the empty string.
///
/// # Safety
/// `text` must be null or a live BSTR that outlives the returned slice.
pub(crate) unsafe fn string_units<'a>(text: *const u16) -> &'a [u16] {
    if text.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(text, string_len(text))
    }
}
