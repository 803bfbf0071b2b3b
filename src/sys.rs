//! Raw OLE automation layouts.
//!
//! These mirror `oaidl.h` / `wtypes.h` byte for byte so that values built here can be handed
//! straight to an `IDispatch` implementation, whichever side of the vtable it lives on.

#![allow(missing_docs)]

use std::ffi::c_void;
use std::fmt;

/// The VARIANT discriminant (`VARTYPE`).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VarType(pub u16);

impl VarType {
    pub const EMPTY: VarType = VarType(0);
    pub const NULL: VarType = VarType(1);
    pub const I2: VarType = VarType(2);
    pub const I4: VarType = VarType(3);
    pub const R4: VarType = VarType(4);
    pub const R8: VarType = VarType(5);
    pub const CY: VarType = VarType(6);
    pub const DATE: VarType = VarType(7);
    pub const BSTR: VarType = VarType(8);
    pub const DISPATCH: VarType = VarType(9);
    pub const ERROR: VarType = VarType(10);
    pub const BOOL: VarType = VarType(11);
    pub const VARIANT: VarType = VarType(12);
    pub const UNKNOWN: VarType = VarType(13);
    pub const DECIMAL: VarType = VarType(14);
    pub const I1: VarType = VarType(16);
    pub const UI1: VarType = VarType(17);
    pub const UI2: VarType = VarType(18);
    pub const UI4: VarType = VarType(19);
    pub const I8: VarType = VarType(20);
    pub const UI8: VarType = VarType(21);
    pub const INT: VarType = VarType(22);
    pub const UINT: VarType = VarType(23);
    pub const RECORD: VarType = VarType(36);

    pub const ARRAY: VarType = VarType(0x2000);
    pub const BYREF: VarType = VarType(0x4000);
    pub const TYPEMASK: VarType = VarType(0x0fff);

    /// Tag with the `VT_BYREF` flag added.
    pub const fn by_ref(self) -> VarType {
        VarType(self.0 | Self::BYREF.0)
    }

    /// Tag with the `VT_ARRAY` flag added.
    pub const fn array_of(self) -> VarType {
        VarType(self.0 | Self::ARRAY.0)
    }

    pub const fn is_byref(self) -> bool {
        self.0 & Self::BYREF.0 != 0
    }

    pub const fn is_array(self) -> bool {
        self.0 & Self::ARRAY.0 != 0
    }

    /// The element/base type with every modifier flag stripped.
    pub const fn base(self) -> VarType {
        VarType(self.0 & Self::TYPEMASK.0)
    }

    /// Tag without `VT_BYREF`, keeping `VT_ARRAY`.
    pub const fn without_byref(self) -> VarType {
        VarType(self.0 & !Self::BYREF.0)
    }

    fn base_name(self) -> Option<&'static str> {
        let name = match self {
            Self::EMPTY => "VT_EMPTY",
            Self::NULL => "VT_NULL",
            Self::I2 => "VT_I2",
            Self::I4 => "VT_I4",
            Self::R4 => "VT_R4",
            Self::R8 => "VT_R8",
            Self::CY => "VT_CY",
            Self::DATE => "VT_DATE",
            Self::BSTR => "VT_BSTR",
            Self::DISPATCH => "VT_DISPATCH",
            Self::ERROR => "VT_ERROR",
            Self::BOOL => "VT_BOOL",
            Self::VARIANT => "VT_VARIANT",
            Self::UNKNOWN => "VT_UNKNOWN",
            Self::DECIMAL => "VT_DECIMAL",
            Self::I1 => "VT_I1",
            Self::UI1 => "VT_UI1",
            Self::UI2 => "VT_UI2",
            Self::UI4 => "VT_UI4",
            Self::I8 => "VT_I8",
            Self::UI8 => "VT_UI8",
            Self::INT => "VT_INT",
            Self::UINT => "VT_UINT",
            Self::RECORD => "VT_RECORD",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_byref() {
            f.write_str("VT_BYREF|")?;
        }
        if self.is_array() {
            f.write_str("VT_ARRAY|")?;
        }
        match self.base().base_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "VT_{:#06x}", self.base().0),
        }
    }
}

impl fmt::Debug for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A COM status code.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HResult(pub i32);

impl HResult {
    pub const S_OK: HResult = HResult(0);
    pub const S_FALSE: HResult = HResult(1);
    pub const E_NOTIMPL: HResult = HResult(0x8000_4001_u32 as i32);
    pub const E_NOINTERFACE: HResult = HResult(0x8000_4002_u32 as i32);
    pub const E_POINTER: HResult = HResult(0x8000_4003_u32 as i32);
    pub const E_FAIL: HResult = HResult(0x8000_4005_u32 as i32);
    pub const E_OUTOFMEMORY: HResult = HResult(0x8007_000E_u32 as i32);
    pub const E_INVALIDARG: HResult = HResult(0x8007_0057_u32 as i32);
    pub const DISP_E_UNKNOWNINTERFACE: HResult = HResult(0x8002_0001_u32 as i32);
    pub const DISP_E_MEMBERNOTFOUND: HResult = HResult(0x8002_0003_u32 as i32);
    pub const DISP_E_PARAMNOTFOUND: HResult = HResult(0x8002_0004_u32 as i32);
    pub const DISP_E_TYPEMISMATCH: HResult = HResult(0x8002_0005_u32 as i32);
    pub const DISP_E_UNKNOWNNAME: HResult = HResult(0x8002_0006_u32 as i32);
    pub const DISP_E_BADVARTYPE: HResult = HResult(0x8002_0008_u32 as i32);
    pub const DISP_E_EXCEPTION: HResult = HResult(0x8002_0009_u32 as i32);
    pub const DISP_E_OVERFLOW: HResult = HResult(0x8002_000A_u32 as i32);
    pub const DISP_E_BADPARAMCOUNT: HResult = HResult(0x8002_000E_u32 as i32);

    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }

    pub const fn is_err(self) -> bool {
        self.0 < 0
    }

    /// Converts to a `Result`, keeping the failing code.
    pub fn ok(self) -> Result<(), HResult> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// The `HRESULT` an `EXCEPINFO` with only `wCode` set stands for.
    pub const fn from_wcode(code: u16) -> HResult {
        HResult((0x8004_0200_u32 as i32).wrapping_add(code as i32))
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HResult(0x{:08X})", self.0 as u32)
    }
}

/// `VARIANT_BOOL`: all bits set for true, zero for false.
pub type VariantBoolRaw = i16;
pub const VARIANT_TRUE: VariantBoolRaw = -1;
pub const VARIANT_FALSE: VariantBoolRaw = 0;

pub type DispId = i32;
pub const DISPID_UNKNOWN: DispId = -1;
pub const DISPID_VALUE: DispId = 0;
pub const DISPID_PROPERTYPUT: DispId = -3;

pub const DISPATCH_METHOD: u16 = 0x1;
pub const DISPATCH_PROPERTYGET: u16 = 0x2;
pub const DISPATCH_PROPERTYPUT: u16 = 0x4;
pub const DISPATCH_PROPERTYPUTREF: u16 = 0x8;

pub const LOCALE_USER_DEFAULT: u32 = 0x0400;

pub const FADF_BSTR: u16 = 0x0100;
pub const FADF_UNKNOWN: u16 = 0x0200;
pub const FADF_DISPATCH: u16 = 0x0400;
pub const FADF_VARIANT: u16 = 0x0800;
pub const FADF_HAVEVARTYPE: u16 = 0x0080;

/// `CY`: a 64-bit integer scaled by 10 000.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct Currency {
    pub int64: i64,
}

/// `DECIMAL`: 96-bit unsigned mantissa, power-of-ten scale and sign byte.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
pub struct Decimal {
    pub reserved: u16,
    pub scale: u8,
    pub sign: u8,
    pub hi32: u32,
    pub lo64: u64,
}

pub const DECIMAL_NEG: u8 = 0x80;

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const fn zeroed() -> Guid {
        Guid { data1: 0, data2: 0, data3: 0, data4: [0; 8] }
    }
}

pub const IID_IUNKNOWN: Guid = Guid {
    data1: 0x0000_0000,
    data2: 0x0000,
    data3: 0x0000,
    data4: [0xC0, 0, 0, 0, 0, 0, 0, 0x46],
};

pub const IID_IDISPATCH: Guid = Guid {
    data1: 0x0002_0400,
    data2: 0x0000,
    data3: 0x0000,
    data4: [0xC0, 0, 0, 0, 0, 0, 0, 0x46],
};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SafeArrayBound {
    pub elements: u32,
    pub lower_bound: i32,
}

/// `SAFEARRAY` header. Only the first dimension's bound is declared; further bounds follow it
/// in memory for multi-dimensional arrays.
#[repr(C)]
#[derive(Debug)]
pub struct SafeArrayDesc {
    pub dims: u16,
    pub features: u16,
    pub element_size: u32,
    pub locks: u32,
    pub data: *mut c_void,
    pub bounds: [SafeArrayBound; 1],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RecordPayload {
    pub record: *mut c_void,
    pub record_info: *mut c_void,
}

/// Payload half of a VARIANT.
#[repr(C)]
#[derive(Clone, Copy)]
pub union VariantData {
    pub ll_val: i64,
    pub l_val: i32,
    pub b_val: u8,
    pub i_val: i16,
    pub flt_val: f32,
    pub dbl_val: f64,
    pub bool_val: VariantBoolRaw,
    pub scode: i32,
    pub cy_val: Currency,
    pub date: f64,
    pub bstr_val: *mut u16,
    pub punk_val: *mut c_void,
    pub pdisp_val: *mut c_void,
    pub parray: *mut SafeArrayDesc,
    pub byref: *mut c_void,
    pub c_val: i8,
    pub ui_val: u16,
    pub ul_val: u32,
    pub ull_val: u64,
    pub int_val: i32,
    pub uint_val: u32,
    pub pvar_val: *mut RawVariant,
    pub pdec_val: *mut Decimal,
    pub record: RecordPayload,
}

/// `VARIANT` / `VARIANTARG`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawVariant {
    pub vt: VarType,
    pub reserved1: u16,
    pub reserved2: u16,
    pub reserved3: u16,
    pub data: VariantData,
}

impl RawVariant {
    pub const EMPTY: RawVariant = RawVariant {
        vt: VarType::EMPTY,
        reserved1: 0,
        reserved2: 0,
        reserved3: 0,
        data: VariantData {
            record: RecordPayload {
                record: std::ptr::null_mut(),
                record_info: std::ptr::null_mut(),
            },
        },
    };

    /// Reads a by-value `VT_DECIMAL`, which overlays the whole structure.
    ///
    /// # Safety
    /// `self.vt` must be `VT_DECIMAL`.
    pub unsafe fn overlaid_decimal(&self) -> Decimal {
        let mut decimal = std::ptr::read((self as *const RawVariant).cast::<Decimal>());
        decimal.reserved = 0;
        decimal
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct DispParams {
    pub args: *mut RawVariant,
    pub named_args: *mut DispId,
    pub arg_count: u32,
    pub named_arg_count: u32,
}

pub type DeferredFillIn = unsafe extern "system" fn(*mut ExcepInfo) -> HResult;

/// `EXCEPINFO`. The three strings are BSTRs owned by whoever holds the structure.
#[repr(C)]
#[derive(Debug)]
pub struct ExcepInfo {
    pub code: u16,
    pub reserved: u16,
    pub source: *mut u16,
    pub description: *mut u16,
    pub help_file: *mut u16,
    pub help_context: u32,
    pub reserved_ptr: *mut c_void,
    pub deferred_fill_in: Option<DeferredFillIn>,
    pub scode: i32,
}

#[repr(C)]
pub struct IUnknownVtbl {
    pub query_interface:
        unsafe extern "system" fn(this: *mut c_void, iid: *const Guid, out: *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "system" fn(this: *mut c_void) -> u32,
    pub release: unsafe extern "system" fn(this: *mut c_void) -> u32,
}

#[repr(C)]
pub struct IDispatchVtbl {
    pub base: IUnknownVtbl,
    pub get_type_info_count: unsafe extern "system" fn(this: *mut c_void, count: *mut u32) -> HResult,
    pub get_type_info: unsafe extern "system" fn(
        this: *mut c_void,
        index: u32,
        lcid: u32,
        info: *mut *mut c_void,
    ) -> HResult,
    pub get_ids_of_names: unsafe extern "system" fn(
        this: *mut c_void,
        iid: *const Guid,
        names: *const *const u16,
        count: u32,
        lcid: u32,
        ids: *mut DispId,
    ) -> HResult,
    pub invoke: unsafe extern "system" fn(
        this: *mut c_void,
        dispid: DispId,
        iid: *const Guid,
        lcid: u32,
        flags: u16,
        params: *mut DispParams,
        result: *mut RawVariant,
        excep: *mut ExcepInfo,
        arg_err: *mut u32,
    ) -> HResult,
}

/// The portable layouts above, checked at compile time against the platform definitions.
#[cfg(windows)]
mod abi {
    use std::mem::{align_of, offset_of, size_of};

    use windows::core::{IUnknown_Vtbl, GUID};
    use windows::Win32::Foundation::DECIMAL;
    use windows::Win32::System::Com::{
        IDispatch_Vtbl, CY, DISPPARAMS, EXCEPINFO, SAFEARRAY, SAFEARRAYBOUND,
    };
    use windows::Win32::System::Variant::VARIANT;

    use super::*;

    macro_rules! same_layout {
        ($($ours:ty => $platform:ty),* $(,)?) => {
            $(
                const _: () = assert!(
                    size_of::<$ours>() == size_of::<$platform>()
                        && align_of::<$ours>() == align_of::<$platform>()
                );
            )*
        };
    }

    macro_rules! same_offset {
        ($($ours:ty, $field:ident => $platform:ty, $platform_field:ident);* $(;)?) => {
            $(
                const _: () = assert!(
                    offset_of!($ours, $field) == offset_of!($platform, $platform_field)
                );
            )*
        };
    }

    same_layout! {
        RawVariant => VARIANT,
        Currency => CY,
        Decimal => DECIMAL,
        Guid => GUID,
        SafeArrayBound => SAFEARRAYBOUND,
        SafeArrayDesc => SAFEARRAY,
        DispParams => DISPPARAMS,
        ExcepInfo => EXCEPINFO,
        IUnknownVtbl => IUnknown_Vtbl,
        IDispatchVtbl => IDispatch_Vtbl,
    }

    same_offset! {
        Decimal, hi32 => DECIMAL, Hi32;
        SafeArrayBound, lower_bound => SAFEARRAYBOUND, lLbound;
        SafeArrayDesc, features => SAFEARRAY, fFeatures;
        SafeArrayDesc, element_size => SAFEARRAY, cbElements;
        SafeArrayDesc, locks => SAFEARRAY, cLocks;
        SafeArrayDesc, data => SAFEARRAY, pvData;
        SafeArrayDesc, bounds => SAFEARRAY, rgsabound;
        DispParams, args => DISPPARAMS, rgvarg;
        DispParams, named_args => DISPPARAMS, rgdispidNamedArgs;
        DispParams, arg_count => DISPPARAMS, cArgs;
        DispParams, named_arg_count => DISPPARAMS, cNamedArgs;
        ExcepInfo, source => EXCEPINFO, bstrSource;
        ExcepInfo, description => EXCEPINFO, bstrDescription;
        ExcepInfo, help_file => EXCEPINFO, bstrHelpFile;
        ExcepInfo, help_context => EXCEPINFO, dwHelpContext;
        ExcepInfo, deferred_fill_in => EXCEPINFO, pfnDeferredFillIn;
        ExcepInfo, scode => EXCEPINFO, scode;
        IDispatchVtbl, get_type_info_count => IDispatch_Vtbl, GetTypeInfoCount;
        IDispatchVtbl, get_ids_of_names => IDispatch_Vtbl, GetIDsOfNames;
        IDispatchVtbl, invoke => IDispatch_Vtbl, Invoke;
    }

    // The payload starts after the tag and three reserved words on every target.
    const _: () = assert!(offset_of!(RawVariant, data) == 8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of, size_of};

    #[test]
    fn test_variant_layout() {
        #[cfg(target_pointer_width = "64")]
        assert_eq!(size_of::<RawVariant>(), 24);
        #[cfg(target_pointer_width = "32")]
        assert_eq!(size_of::<RawVariant>(), 16);
        assert_eq!(align_of::<RawVariant>(), 8);
        assert_eq!(offset_of!(RawVariant, vt), 0);
        assert_eq!(offset_of!(RawVariant, data), 8);
    }

    #[test]
    fn test_decimal_overlays_variant_header() {
        assert_eq!(size_of::<Decimal>(), 16);
        assert_eq!(offset_of!(Decimal, scale), 2);
        assert_eq!(offset_of!(Decimal, hi32), 4);
        assert_eq!(offset_of!(Decimal, lo64), 8);
    }

    #[test]
    fn test_abi_struct_sizes() {
        assert_eq!(size_of::<Currency>(), 8);
        assert_eq!(size_of::<Guid>(), 16);
        assert_eq!(size_of::<SafeArrayBound>(), 8);
        #[cfg(target_pointer_width = "64")]
        {
            assert_eq!(size_of::<SafeArrayDesc>(), 32);
            assert_eq!(size_of::<DispParams>(), 24);
            assert_eq!(size_of::<ExcepInfo>(), 64);
        }
    }

    #[cfg(windows)]
    #[test]
    fn test_variant_reads_back_through_platform_type() {
        use windows::Win32::System::Variant::{VARIANT, VT_I4};

        let mut raw = RawVariant::EMPTY;
        raw.vt = VarType::I4;
        raw.data.l_val = 42;
        let platform = unsafe { &*(&raw as *const RawVariant).cast::<VARIANT>() };
        unsafe {
            assert_eq!(platform.Anonymous.Anonymous.vt, VT_I4);
            assert_eq!(platform.Anonymous.Anonymous.Anonymous.lVal, 42);
        }
    }

    #[test]
    fn test_vartype_flags() {
        let tag = VarType::I2.by_ref();
        assert!(tag.is_byref());
        assert!(!tag.is_array());
        assert_eq!(tag.base(), VarType::I2);
        assert_eq!(tag.without_byref(), VarType::I2);
        assert_eq!(tag.to_string(), "VT_BYREF|VT_I2");
        assert_eq!(VarType::BSTR.array_of().to_string(), "VT_ARRAY|VT_BSTR");
    }

    #[test]
    fn test_hresult_helpers() {
        assert!(HResult::S_FALSE.is_ok());
        assert!(HResult::DISP_E_OVERFLOW.is_err());
        assert_eq!(HResult::DISP_E_TYPEMISMATCH.to_string(), "0x80020005");
        assert_eq!(HResult::from_wcode(1000).0 as u32, 0x8004_05E8);
        assert_eq!(HResult::E_FAIL.ok(), Err(HResult::E_FAIL));
    }
}
