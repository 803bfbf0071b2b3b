//! The VARIANT tagged value and its typed accessors.

mod binding;
pub mod date;
mod numeric;
mod safe;

use std::ffi::c_void;
use std::fmt;

pub use self::binding::{Empty, GetVariant, Native, Null, RefTarget, SetVariant};
pub use self::safe::{kind, Date, ErrorCode, Int, Kind, Safe, SafeRef, UInt, VariantBool};

use crate::com;
use crate::error::{AutomationError, Result};
use crate::ole;
use crate::sys::{RawVariant, SafeArrayDesc, VarType, VariantData, VARIANT_FALSE};

/// An owned VARIANT.
///
/// The tag decides which payload is live and whether the variant owns it. Strings, interface
/// references and arrays are owned unless the tag carries `VT_BYREF`, in which case the payload
/// points into someone else's storage and is never released here.
#[repr(transparent)]
pub struct Variant(pub(crate) RawVariant);

/// Tags whose payload holds no resource.
fn is_plain(vt: VarType) -> bool {
    matches!(
        vt,
        VarType::EMPTY
            | VarType::NULL
            | VarType::I1
            | VarType::UI1
            | VarType::I2
            | VarType::UI2
            | VarType::I4
            | VarType::UI4
            | VarType::INT
            | VarType::UINT
            | VarType::I8
            | VarType::UI8
            | VarType::R4
            | VarType::R8
            | VarType::CY
            | VarType::DATE
            | VarType::BOOL
            | VarType::ERROR
            | VarType::DECIMAL
    )
}

impl Variant {
    pub const fn new() -> Self {
        Variant(RawVariant::EMPTY)
    }

    pub fn from_value<T: SetVariant>(value: T) -> Result<Self> {
        let mut variant = Variant::new();
        variant.set(value)?;
        Ok(variant)
    }

    /// Adopts a raw VARIANT.
    ///
    /// # Safety
    /// The payload must match the tag, and any owned payload must be transferred to the
    /// returned value.
    pub unsafe fn from_raw(raw: RawVariant) -> Self {
        Variant(raw)
    }

    /// Gives up ownership of the payload.
    pub fn into_raw(self) -> RawVariant {
        let raw = self.0;
        std::mem::forget(self);
        raw
    }

    pub fn as_raw(&self) -> &RawVariant {
        &self.0
    }

    pub fn as_mut_ptr(&mut self) -> *mut RawVariant {
        &mut self.0
    }

    pub fn vt(&self) -> VarType {
        self.0.vt
    }

    pub fn is_empty(&self) -> bool {
        self.vt() == VarType::EMPTY
    }

    pub fn is_null(&self) -> bool {
        self.vt() == VarType::NULL
    }

    pub(crate) fn data(&self) -> &VariantData {
        &self.0.data
    }

    /// Resets to `VT_EMPTY` without releasing anything. An owned payload is forgotten.
    pub fn init(&mut self) {
        if self.owns_payload() {
            log::warn!("init() forgot an owned {} payload", self.vt());
        }
        self.0 = RawVariant::EMPTY;
    }

    fn owns_payload(&self) -> bool {
        let vt = self.vt();
        if vt.is_byref() || is_plain(vt) {
            return false;
        }
        // SAFETY: every owned non-plain payload starts with a pointer.
        !unsafe { self.0.data.byref }.is_null()
    }

    /// Releases the payload according to its tag and resets to `VT_EMPTY`.
    pub fn clear(&mut self) {
        let vt = self.vt();
        if !vt.is_byref() && !is_plain(vt) {
            // SAFETY: the tag names the live payload and, without VT_BYREF, we own it.
            unsafe {
                if vt.is_array() {
                    let hr = ole::destroy_array(self.0.data.parray);
                    if hr.is_err() {
                        log::warn!("destroying {} payload failed: {}", vt, hr);
                    }
                } else {
                    match vt {
                        VarType::BSTR => ole::free_string(self.0.data.bstr_val),
                        VarType::UNKNOWN | VarType::DISPATCH => {
                            let raw = self.0.data.punk_val;
                            if !raw.is_null() {
                                com::release_raw(raw);
                            }
                        }
                        _ => ole::clear_foreign(&mut self.0),
                    }
                }
            }
        }
        self.0 = RawVariant::EMPTY;
    }

    /// Converts the value to `vt` in place.
    ///
    /// On failure the variant is left exactly as it was.
    pub fn change_type(&mut self, vt: VarType) -> Result<()> {
        let from = self.vt();
        if from == vt {
            return Ok(());
        }
        if from.is_byref() {
            return Err(AutomationError::mismatch(from, vt));
        }
        let mut converted = Variant::new();
        // SAFETY: both point at initialised variants; the destination is empty.
        let hr = unsafe { ole::change_type(&mut converted.0, &self.0, vt) };
        if hr.is_err() {
            log::debug!("VariantChangeType {} -> {} failed: {}", from, vt, hr);
            return Err(AutomationError::coercion(from, vt, hr));
        }
        *self = converted;
        Ok(())
    }

    pub fn set<T: SetVariant>(&mut self, value: T) -> Result<()> {
        value.set_into(self)
    }

    pub fn get<T: GetVariant>(&mut self) -> Result<T> {
        T::get_from(self)
    }

    /// Points the variant at caller storage, tagging it `T::VT | VT_BYREF`. A null pointer is
    /// stored as a null reference of that type.
    ///
    /// # Safety
    /// `target` must stay valid for as long as this variant can be handed to an automation
    /// object.
    pub unsafe fn set_ref<T: RefTarget>(&mut self, target: *mut T) {
        self.store_ref(T::VT, target.cast());
    }

    /// [`Self::set_ref`] for a storage type pinned to the tag of `K`.
    ///
    /// # Safety
    /// As for [`Self::set_ref`].
    pub unsafe fn set_safe_ref<K: Kind>(&mut self, target: *mut K::Storage) {
        self.store_ref(K::VT, target.cast());
    }

    /// The pointer behind a `T::VT | VT_BYREF` variant, which may be null. Any other tag fails.
    pub fn get_ref<T: RefTarget>(&self) -> Result<*mut T> {
        self.load_ref(T::VT).map(|target| target.cast())
    }

    pub fn get_safe_ref<K: Kind>(&self) -> Result<*mut K::Storage> {
        self.load_ref(K::VT).map(|target| target.cast())
    }

    fn store_ref(&mut self, vt: VarType, target: *mut c_void) {
        self.clear();
        self.0.data.byref = target;
        self.0.vt = vt.by_ref();
    }

    fn load_ref(&self, vt: VarType) -> Result<*mut c_void> {
        let expected = vt.by_ref();
        if self.vt() != expected {
            return Err(AutomationError::mismatch(self.vt(), expected));
        }
        // SAFETY: by-reference tags always carry a pointer payload.
        Ok(unsafe { self.0.data.byref })
    }

    pub(crate) fn store<K: Kind>(&mut self, value: K::Storage) {
        self.clear();
        K::store(&mut self.0.data, value);
        self.0.vt = K::VT;
    }

    pub(crate) fn load<K: Kind>(&mut self) -> Result<K::Storage> {
        self.change_type(K::VT)?;
        // SAFETY: the tag is now K::VT.
        Ok(unsafe { K::load(&self.0.data) })
    }

    /// Adopts an owned array with element tag `element`.
    pub(crate) fn store_array(&mut self, element: VarType, array: *mut SafeArrayDesc) {
        self.clear();
        self.0.data.parray = array;
        self.0.vt = element.array_of();
    }

    /// Deep copy: strings duplicated, interfaces AddRef'd, arrays copied, references shared.
    pub fn try_clone(&self) -> Result<Variant> {
        let vt = self.vt();
        if vt.is_byref() || is_plain(vt) {
            return Ok(Variant(self.0));
        }
        let mut raw = self.0;
        // SAFETY: the tag names the live owned payload; the copy gets its own resource before
        // it is wrapped.
        unsafe {
            if vt.is_array() {
                if !raw.data.parray.is_null() {
                    raw.data.parray = ole::copy_array(raw.data.parray)
                        .map_err(|_| AutomationError::Allocation { what: "SAFEARRAY" })?;
                }
                return Ok(Variant(raw));
            }
            match vt {
                VarType::BSTR => {
                    let units = ole::string_units(raw.data.bstr_val);
                    raw.data.bstr_val = ole::alloc_string_checked(units)?;
                }
                VarType::UNKNOWN | VarType::DISPATCH => {
                    if !raw.data.punk_val.is_null() {
                        com::add_ref_raw(raw.data.punk_val);
                    }
                }
                _ => return Err(AutomationError::mismatch(vt, vt)),
            }
        }
        Ok(Variant(raw))
    }
}

impl Default for Variant {
    fn default() -> Self {
        Variant::new()
    }
}

impl Drop for Variant {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vt = self.vt();
        let data = &self.0.data;
        if vt.is_byref() {
            // SAFETY: by-reference payloads are pointers; only the address is printed.
            return write!(f, "<{} {:p}>", vt, unsafe { data.byref });
        }
        if vt.is_array() {
            // SAFETY: array payloads are SAFEARRAY pointers.
            let array = unsafe { data.parray };
            if array.is_null() {
                return write!(f, "<{} null>", vt);
            }
            // SAFETY: non-null and owned by this variant.
            let len = unsafe { (*array).bounds[0].elements };
            return write!(f, "<{} [{}]>", vt, len);
        }
        // SAFETY: each arm reads the field its tag selects.
        unsafe {
            match vt {
                VarType::EMPTY => f.write_str("Empty"),
                VarType::NULL => f.write_str("Null"),
                VarType::I1 => write!(f, "{}", data.c_val),
                VarType::UI1 => write!(f, "{}", data.b_val),
                VarType::I2 => write!(f, "{}", data.i_val),
                VarType::UI2 => write!(f, "{}", data.ui_val),
                VarType::I4 => write!(f, "{}", data.l_val),
                VarType::UI4 => write!(f, "{}", data.ul_val),
                VarType::INT => write!(f, "{}", data.int_val),
                VarType::UINT => write!(f, "{}", data.uint_val),
                VarType::I8 => write!(f, "{}", data.ll_val),
                VarType::UI8 => write!(f, "{}", data.ull_val),
                VarType::R4 => write!(f, "{}", data.flt_val),
                VarType::R8 => write!(f, "{}", data.dbl_val),
                VarType::CY => write!(f, "{}", data.cy_val),
                VarType::DATE => match date::format_ole_date(data.date) {
                    Some(text) => f.write_str(&text),
                    None => write!(f, "{}", data.date),
                },
                VarType::BOOL => {
                    f.write_str(if data.bool_val == VARIANT_FALSE { "False" } else { "True" })
                }
                VarType::ERROR => write!(f, "Error({})", crate::sys::HResult(data.scode)),
                VarType::DECIMAL => write!(f, "{}", self.0.overlaid_decimal()),
                VarType::BSTR => {
                    let units = ole::string_units(data.bstr_val);
                    f.write_str(&String::from_utf16_lossy(units))
                }
                VarType::UNKNOWN => write!(f, "<IUnknown {:p}>", data.punk_val),
                VarType::DISPATCH => write!(f, "<IDispatch {:p}>", data.pdisp_val),
                other => write!(f, "<{}>", other),
            }
        }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variant({}: {})", self.vt(), self)
    }
}
