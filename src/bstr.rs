use std::alloc::Layout;
use std::fmt;

use widestring::U16Str;

use crate::error::{AutomationError, Result};
use crate::ole;

/// An owned BSTR. A null handle is the empty string.
#[repr(transparent)]
pub struct Bstr(*mut u16);

impl Bstr {
    pub const fn new() -> Self {
        Bstr(std::ptr::null_mut())
    }

    /// Copies UTF-16 code units into a new BSTR.
    pub fn from_wide(units: &[u16]) -> Result<Self> {
        ole::alloc_string_checked(units).map(Bstr)
    }

    pub fn from_str_checked(text: &str) -> Result<Self> {
        let units: Vec<u16> = text.encode_utf16().collect();
        Self::from_wide(&units)
    }

    /// Takes ownership of a raw BSTR.
    ///
    /// # Safety
    /// `raw` must be null or a BSTR allocated by the platform allocator and not owned elsewhere.
    pub unsafe fn from_raw(raw: *mut u16) -> Self {
        Bstr(raw)
    }

    pub fn as_ptr(&self) -> *const u16 {
        self.0
    }

    /// Gives up ownership without freeing.
    pub fn into_raw(self) -> *mut u16 {
        let raw = self.0;
        std::mem::forget(self);
        raw
    }

    pub fn len(&self) -> usize {
        self.as_wide().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_wide(&self) -> &[u16] {
        // SAFETY: we own a live BSTR or null.
        unsafe { ole::string_units(self.0) }
    }

    pub fn as_u16_str(&self) -> &U16Str {
        U16Str::from_slice(self.as_wide())
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(self.as_wide())
    }

    pub fn try_clone(&self) -> Result<Self> {
        Self::from_wide(self.as_wide())
    }
}

impl Default for Bstr {
    fn default() -> Self {
        Bstr::new()
    }
}

impl Drop for Bstr {
    fn drop(&mut self) {
        // SAFETY: we own the allocation.
        unsafe { ole::free_string(self.0) };
    }
}

fn allocation_failed(units: usize) -> ! {
    let layout = Layout::array::<u16>(units + 1).unwrap_or(Layout::new::<u16>());
    std::alloc::handle_alloc_error(layout)
}

impl Clone for Bstr {
    fn clone(&self) -> Self {
        self.try_clone()
            .unwrap_or_else(|_| allocation_failed(self.len()))
    }
}

impl From<&str> for Bstr {
    fn from(value: &str) -> Self {
        let units: Vec<u16> = value.encode_utf16().collect();
        Self::from_wide(&units).unwrap_or_else(|_| allocation_failed(units.len()))
    }
}

impl From<String> for Bstr {
    fn from(value: String) -> Self {
        Bstr::from(value.as_str())
    }
}

impl TryFrom<&Bstr> for String {
    type Error = AutomationError;

    fn try_from(value: &Bstr) -> Result<Self> {
        String::from_utf16(value.as_wide()).map_err(|_| {
            AutomationError::mismatch(crate::sys::VarType::BSTR, crate::sys::VarType::BSTR)
        })
    }
}

impl PartialEq for Bstr {
    fn eq(&self, other: &Self) -> bool {
        self.as_wide() == other.as_wide()
    }
}

impl Eq for Bstr {}

impl PartialEq<str> for Bstr {
    fn eq(&self, other: &str) -> bool {
        self.as_wide().iter().copied().eq(other.encode_utf16())
    }
}

impl PartialEq<&str> for Bstr {
    fn eq(&self, other: &&str) -> bool {
        *self == **other
    }
}

impl fmt::Display for Bstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl fmt::Debug for Bstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bstr({:?})", self.to_string_lossy())
    }
}
