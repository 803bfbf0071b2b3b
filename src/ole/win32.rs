use std::mem::ManuallyDrop;

use windows::core::BSTR;
use windows::Win32::System::Com::SAFEARRAY;
use windows::Win32::System::Ole::{
    SafeArrayCopy, SafeArrayCreateVector, SafeArrayDestroy, SafeArrayGetVartype,
};
use windows::Win32::System::Variant::{
    VariantChangeType, VariantClear, VARENUM, VARIANT, VAR_CHANGE_FLAGS,
};

use crate::sys::{HResult, RawVariant, SafeArrayDesc, VarType};

fn status(err: windows::core::Error) -> HResult {
    HResult(err.code().0)
}

pub(crate) unsafe fn alloc_string(units: &[u16]) -> Result<*mut u16, HResult> {
    BSTR::from_wide(units)
        .map(|text| text.into_raw().cast_mut())
        .map_err(status)
}

pub(crate) unsafe fn free_string(text: *mut u16) {
    if !text.is_null() {
        drop(BSTR::from_raw(text));
    }
}

pub(crate) unsafe fn string_len(text: *const u16) -> usize {
    if text.is_null() {
        return 0;
    }
    ManuallyDrop::new(BSTR::from_raw(text)).len()
}

pub(crate) unsafe fn change_type(
    dest: *mut RawVariant,
    src: *const RawVariant,
    vt: VarType,
) -> HResult {
    match VariantChangeType(
        dest.cast::<VARIANT>(),
        src.cast::<VARIANT>(),
        VAR_CHANGE_FLAGS(0),
        VARENUM(vt.0),
    ) {
        Ok(()) => HResult::S_OK,
        Err(err) => status(err),
    }
}

/// Clears tags this crate does not model itself, such as `VT_RECORD`.
pub(crate) unsafe fn clear_foreign(variant: *mut RawVariant) {
    if let Err(err) = VariantClear(variant.cast::<VARIANT>()) {
        log::warn!("VariantClear failed: {}", status(err));
    }
}

pub(crate) unsafe fn create_vector(vt: VarType, len: u32) -> *mut SafeArrayDesc {
    SafeArrayCreateVector(VARENUM(vt.0), 0, len).cast::<SafeArrayDesc>()
}

pub(crate) unsafe fn destroy_array(array: *mut SafeArrayDesc) -> HResult {
    if array.is_null() {
        return HResult::S_OK;
    }
    match SafeArrayDestroy(array.cast::<SAFEARRAY>()) {
        Ok(()) => HResult::S_OK,
        Err(err) => status(err),
    }
}

pub(crate) unsafe fn copy_array(array: *mut SafeArrayDesc) -> Result<*mut SafeArrayDesc, HResult> {
    SafeArrayCopy(array.cast::<SAFEARRAY>())
        .map(|copy| copy.cast::<SafeArrayDesc>())
        .map_err(status)
}

pub(crate) unsafe fn array_vartype(array: *mut SafeArrayDesc) -> Result<VarType, HResult> {
    SafeArrayGetVartype(array.cast::<SAFEARRAY>())
        .map(|vt| VarType(vt.0))
        .map_err(status)
}
