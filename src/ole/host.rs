//! In-process stand-in for oleaut32 on hosts without a COM runtime.
//!
//! Strings use the real BSTR layout (byte-length prefix, trailing NUL). Arrays are
//! one-dimensional vectors with `FADF_HAVEVARTYPE`. Coercion follows the automation rules for the
//! tags this crate models: range-checked integers with banker's rounding, VARIANT_BOOL encoding,
//! numeric text parsing and currency scaling. Live strings and arrays are counted per thread.

use std::alloc::{alloc, alloc_zeroed, dealloc, Layout};
use std::cell::Cell;
use std::ffi::c_void;
use std::mem::{offset_of, size_of};
use std::ptr;

use crate::com;
use crate::sys::{
    Currency, HResult, RawVariant, SafeArrayBound, SafeArrayDesc, VarType, FADF_BSTR,
    FADF_DISPATCH, FADF_HAVEVARTYPE, FADF_UNKNOWN, FADF_VARIANT, IID_IDISPATCH, VARIANT_FALSE,
    VARIANT_TRUE,
};
use crate::variant::{date, Variant};

thread_local! {
    static LIVE_STRINGS: Cell<isize> = const { Cell::new(0) };
    static LIVE_ARRAYS: Cell<isize> = const { Cell::new(0) };
}

fn bump(counter: &'static std::thread::LocalKey<Cell<isize>>, delta: isize) {
    counter.with(|count| count.set(count.get() + delta));
}

/// Strings and arrays allocated on this thread and not yet freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveResources {
    pub strings: isize,
    pub arrays: isize,
}

/// Snapshot of the current thread's allocation counters.
pub fn live_resources() -> LiveResources {
    LiveResources {
        strings: LIVE_STRINGS.with(Cell::get),
        arrays: LIVE_ARRAYS.with(Cell::get),
    }
}

const PREFIX: usize = size_of::<u32>();

fn string_layout(units: usize) -> Option<Layout> {
    let size = units.checked_mul(2)?.checked_add(PREFIX + 2)?;
    Layout::from_size_align(size, PREFIX).ok()
}

pub(crate) unsafe fn alloc_string(units: &[u16]) -> Result<*mut u16, HResult> {
    if units.is_empty() {
        return Ok(ptr::null_mut());
    }
    let layout = string_layout(units.len()).ok_or(HResult::E_OUTOFMEMORY)?;
    let byte_len = u32::try_from(units.len() * 2).map_err(|_| HResult::E_OUTOFMEMORY)?;
    let base = alloc(layout);
    if base.is_null() {
        return Err(HResult::E_OUTOFMEMORY);
    }
    base.cast::<u32>().write(byte_len);
    let text = base.add(PREFIX).cast::<u16>();
    ptr::copy_nonoverlapping(units.as_ptr(), text, units.len());
    text.add(units.len()).write(0);
    bump(&LIVE_STRINGS, 1);
    Ok(text)
}

pub(crate) unsafe fn free_string(text: *mut u16) {
    if text.is_null() {
        return;
    }
    let base = text.cast::<u8>().sub(PREFIX);
    let units = base.cast::<u32>().read() as usize / 2;
    if let Some(layout) = string_layout(units) {
        dealloc(base, layout);
        bump(&LIVE_STRINGS, -1);
    }
}

pub(crate) unsafe fn string_len(text: *const u16) -> usize {
    if text.is_null() {
        return 0;
    }
    text.cast::<u8>().sub(PREFIX).cast::<u32>().read() as usize / 2
}

pub(crate) unsafe fn clear_foreign(_variant: *mut RawVariant) {}

#[repr(C)]
struct HostArray {
    vt: VarType,
    desc: SafeArrayDesc,
}

fn element_size(vt: VarType) -> Option<usize> {
    let size = match vt {
        VarType::I1 | VarType::UI1 => 1,
        VarType::I2 | VarType::UI2 | VarType::BOOL => 2,
        VarType::I4
        | VarType::UI4
        | VarType::INT
        | VarType::UINT
        | VarType::R4
        | VarType::ERROR => 4,
        VarType::I8 | VarType::UI8 | VarType::R8 | VarType::CY | VarType::DATE => 8,
        VarType::BSTR | VarType::UNKNOWN | VarType::DISPATCH => size_of::<*mut c_void>(),
        VarType::VARIANT => size_of::<RawVariant>(),
        VarType::DECIMAL => 16,
        _ => return None,
    };
    Some(size)
}

fn data_layout(vt: VarType, len: usize) -> Option<Layout> {
    let size = element_size(vt)?.checked_mul(len)?;
    Layout::from_size_align(size, 8).ok()
}

unsafe fn host_array(desc: *mut SafeArrayDesc) -> *mut HostArray {
    desc.byte_sub(offset_of!(HostArray, desc)).cast::<HostArray>()
}

pub(crate) unsafe fn create_vector(vt: VarType, len: u32) -> *mut SafeArrayDesc {
    let Some(size) = element_size(vt) else {
        return ptr::null_mut();
    };
    let data = if len == 0 {
        ptr::null_mut()
    } else {
        let Some(layout) = data_layout(vt, len as usize) else {
            return ptr::null_mut();
        };
        let data = alloc_zeroed(layout);
        if data.is_null() {
            return ptr::null_mut();
        }
        data.cast::<c_void>()
    };
    let features = FADF_HAVEVARTYPE
        | match vt {
            VarType::BSTR => FADF_BSTR,
            VarType::UNKNOWN => FADF_UNKNOWN,
            VarType::DISPATCH => FADF_DISPATCH,
            VarType::VARIANT => FADF_VARIANT,
            _ => 0,
        };
    let array = Box::into_raw(Box::new(HostArray {
        vt,
        desc: SafeArrayDesc {
            dims: 1,
            features,
            element_size: size as u32,
            locks: 0,
            data,
            bounds: [SafeArrayBound {
                elements: len,
                lower_bound: 0,
            }],
        },
    }));
    bump(&LIVE_ARRAYS, 1);
    ptr::addr_of_mut!((*array).desc)
}

unsafe fn release_elements(vt: VarType, data: *mut c_void, len: usize) {
    match vt {
        VarType::BSTR => {
            let items = data.cast::<*mut u16>();
            for index in 0..len {
                free_string(items.add(index).read());
            }
        }
        VarType::UNKNOWN | VarType::DISPATCH => {
            let items = data.cast::<*mut c_void>();
            for index in 0..len {
                let item = items.add(index).read();
                if !item.is_null() {
                    com::release_raw(item);
                }
            }
        }
        VarType::VARIANT => {
            let items = data.cast::<Variant>();
            for index in 0..len {
                ptr::drop_in_place(items.add(index));
            }
        }
        _ => {}
    }
}

pub(crate) unsafe fn destroy_array(desc: *mut SafeArrayDesc) -> HResult {
    if desc.is_null() {
        return HResult::S_OK;
    }
    if (*desc).locks != 0 {
        return HResult(0x8002_000D_u32 as i32); // DISP_E_ARRAYISLOCKED
    }
    let array = host_array(desc);
    let vt = (*array).vt;
    let len = (*desc).bounds[0].elements as usize;
    let data = (*desc).data;
    if !data.is_null() {
        release_elements(vt, data, len);
        if let Some(layout) = data_layout(vt, len) {
            dealloc(data.cast::<u8>(), layout);
        }
    }
    drop(Box::from_raw(array));
    bump(&LIVE_ARRAYS, -1);
    HResult::S_OK
}

pub(crate) unsafe fn array_vartype(desc: *mut SafeArrayDesc) -> Result<VarType, HResult> {
    if desc.is_null() {
        return Err(HResult::E_INVALIDARG);
    }
    Ok((*host_array(desc)).vt)
}

pub(crate) unsafe fn copy_array(desc: *mut SafeArrayDesc) -> Result<*mut SafeArrayDesc, HResult> {
    let vt = array_vartype(desc)?;
    let len = (*desc).bounds[0].elements;
    let copy = create_vector(vt, len);
    if copy.is_null() {
        return Err(HResult::E_OUTOFMEMORY);
    }
    if let Err(code) = copy_elements(vt, (*desc).data, (*copy).data, len as usize) {
        destroy_array(copy);
        return Err(code);
    }
    Ok(copy)
}

unsafe fn copy_elements(
    vt: VarType,
    src: *mut c_void,
    dst: *mut c_void,
    len: usize,
) -> Result<(), HResult> {
    if len == 0 {
        return Ok(());
    }
    match vt {
        VarType::BSTR => {
            let (src, dst) = (src.cast::<*mut u16>(), dst.cast::<*mut u16>());
            for index in 0..len {
                let text = src.add(index).read();
                let units = super::string_units(text);
                dst.add(index).write(alloc_string(units)?);
            }
        }
        VarType::UNKNOWN | VarType::DISPATCH => {
            let (src, dst) = (src.cast::<*mut c_void>(), dst.cast::<*mut c_void>());
            for index in 0..len {
                let item = src.add(index).read();
                if !item.is_null() {
                    com::add_ref_raw(item);
                }
                dst.add(index).write(item);
            }
        }
        VarType::VARIANT => {
            let (src, dst) = (src.cast::<Variant>(), dst.cast::<Variant>());
            for index in 0..len {
                let copy = (*src.add(index))
                    .try_clone()
                    .map_err(|err| err.hresult().unwrap_or(HResult::E_FAIL))?;
                dst.add(index).write(copy);
            }
        }
        _ => {
            let bytes = element_size(vt).unwrap_or(0) * len;
            ptr::copy_nonoverlapping(src.cast::<u8>(), dst.cast::<u8>(), bytes);
        }
    }
    Ok(())
}

/// Intermediate form every source tag is read into before being written to the target tag.
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Empty,
    Int(i128),
    Float(f64),
    Currency(i64),
    Date(f64),
    Bool(bool),
    Text(String),
    Error(i32),
}

pub(crate) unsafe fn change_type(
    dest: *mut RawVariant,
    src: *const RawVariant,
    vt: VarType,
) -> HResult {
    match coerce(&*src, vt) {
        Ok(raw) => {
            dest.write(raw);
            HResult::S_OK
        }
        Err(code) => code,
    }
}

unsafe fn coerce(src: &RawVariant, to: VarType) -> Result<RawVariant, HResult> {
    if src.vt.is_byref() || src.vt.is_array() || to.is_byref() || to.is_array() {
        return Err(HResult::DISP_E_TYPEMISMATCH);
    }
    if to == VarType::EMPTY {
        return Ok(RawVariant::EMPTY);
    }
    let mut out = RawVariant::EMPTY;
    out.vt = to;
    match (src.vt, to) {
        (VarType::NULL, VarType::NULL) => return Ok(out),
        (VarType::NULL, _) | (_, VarType::NULL) => return Err(HResult::DISP_E_TYPEMISMATCH),
        (VarType::UNKNOWN | VarType::DISPATCH, VarType::UNKNOWN)
        | (VarType::DISPATCH, VarType::DISPATCH) => {
            let raw = src.data.punk_val;
            if !raw.is_null() {
                com::add_ref_raw(raw);
            }
            out.data.punk_val = raw;
            return Ok(out);
        }
        (VarType::UNKNOWN, VarType::DISPATCH) => {
            let raw = src.data.punk_val;
            out.data.pdisp_val = if raw.is_null() {
                ptr::null_mut()
            } else {
                com::query_raw(raw, &IID_IDISPATCH).map_err(|_| HResult::DISP_E_TYPEMISMATCH)?
            };
            return Ok(out);
        }
        (VarType::UNKNOWN | VarType::DISPATCH, _) | (_, VarType::UNKNOWN | VarType::DISPATCH) => {
            return Err(HResult::DISP_E_TYPEMISMATCH)
        }
        _ => {}
    }

    let value = read_scalar(src)?;
    let data = &mut out.data;
    match to {
        VarType::I1 => data.c_val = integer(&value, -1)?,
        VarType::UI1 => data.b_val = integer(&value, u8::MAX)?,
        VarType::I2 => data.i_val = integer(&value, -1)?,
        VarType::UI2 => data.ui_val = integer(&value, u16::MAX)?,
        VarType::I4 => data.l_val = integer(&value, -1)?,
        VarType::UI4 => data.ul_val = integer(&value, u32::MAX)?,
        VarType::INT => data.int_val = integer(&value, -1)?,
        VarType::UINT => data.uint_val = integer(&value, u32::MAX)?,
        VarType::I8 => data.ll_val = integer(&value, -1)?,
        VarType::UI8 => data.ull_val = integer(&value, u64::MAX)?,
        VarType::R4 => {
            let float = float(&value)?;
            if float.is_finite() && float.abs() > f64::from(f32::MAX) {
                return Err(HResult::DISP_E_OVERFLOW);
            }
            data.flt_val = float as f32;
        }
        VarType::R8 => data.dbl_val = float(&value)?,
        VarType::CY => data.cy_val = currency(&value)?,
        VarType::DATE => data.date = ole_date(&value)?,
        VarType::BOOL => {
            data.bool_val = if boolean(&value)? {
                VARIANT_TRUE
            } else {
                VARIANT_FALSE
            }
        }
        VarType::BSTR => {
            let units: Vec<u16> = text(&value)?.encode_utf16().collect();
            data.bstr_val = alloc_string(&units)?;
        }
        VarType::ERROR => match value {
            Scalar::Error(code) => data.scode = code,
            _ => return Err(HResult::DISP_E_TYPEMISMATCH),
        },
        _ => return Err(HResult::DISP_E_BADVARTYPE),
    }
    Ok(out)
}

unsafe fn read_scalar(src: &RawVariant) -> Result<Scalar, HResult> {
    let data = &src.data;
    let value = match src.vt {
        VarType::EMPTY => Scalar::Empty,
        VarType::I1 => Scalar::Int(data.c_val.into()),
        VarType::UI1 => Scalar::Int(data.b_val.into()),
        VarType::I2 => Scalar::Int(data.i_val.into()),
        VarType::UI2 => Scalar::Int(data.ui_val.into()),
        VarType::I4 => Scalar::Int(data.l_val.into()),
        VarType::UI4 => Scalar::Int(data.ul_val.into()),
        VarType::INT => Scalar::Int(data.int_val.into()),
        VarType::UINT => Scalar::Int(data.uint_val.into()),
        VarType::I8 => Scalar::Int(data.ll_val.into()),
        VarType::UI8 => Scalar::Int(data.ull_val.into()),
        VarType::R4 => Scalar::Float(data.flt_val.into()),
        VarType::R8 => Scalar::Float(data.dbl_val),
        VarType::CY => Scalar::Currency(data.cy_val.int64),
        VarType::DATE => Scalar::Date(data.date),
        VarType::BOOL => Scalar::Bool(data.bool_val != VARIANT_FALSE),
        VarType::ERROR => Scalar::Error(data.scode),
        VarType::DECIMAL => Scalar::Float(src.overlaid_decimal().to_f64()),
        VarType::BSTR => {
            Scalar::Text(String::from_utf16_lossy(super::string_units(data.bstr_val)))
        }
        _ => return Err(HResult::DISP_E_BADVARTYPE),
    };
    Ok(value)
}

fn parse_number(text: &str) -> Result<Scalar, HResult> {
    let trimmed = text.trim();
    if let Ok(int) = trimmed.parse::<i128>() {
        return Ok(Scalar::Int(int));
    }
    match trimmed.parse::<f64>() {
        Ok(float) if float.is_finite() => Ok(Scalar::Float(float)),
        _ => Err(HResult::DISP_E_TYPEMISMATCH),
    }
}

fn round_float(float: f64) -> Result<i128, HResult> {
    let rounded = float.round_ties_even();
    if !rounded.is_finite() || rounded < i128::MIN as f64 || rounded > i128::MAX as f64 {
        return Err(HResult::DISP_E_OVERFLOW);
    }
    Ok(rounded as i128)
}

fn round_currency(scaled: i64) -> i128 {
    let scaled = i128::from(scaled);
    let (quotient, remainder) = (scaled.div_euclid(10_000), scaled.rem_euclid(10_000));
    match remainder.cmp(&5_000) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal => quotient + (quotient & 1),
    }
}

/// `truthy` is what VARIANT_TRUE becomes in the target width: all bits set.
fn integer<T: TryFrom<i128>>(value: &Scalar, truthy: T) -> Result<T, HResult> {
    let wide = match value {
        Scalar::Empty => 0,
        Scalar::Int(int) => *int,
        Scalar::Float(float) | Scalar::Date(float) => round_float(*float)?,
        Scalar::Currency(scaled) => round_currency(*scaled),
        Scalar::Bool(true) => return Ok(truthy),
        Scalar::Bool(false) => 0,
        Scalar::Text(text) => return integer(&parse_number(text)?, truthy),
        Scalar::Error(_) => return Err(HResult::DISP_E_TYPEMISMATCH),
    };
    T::try_from(wide).map_err(|_| HResult::DISP_E_OVERFLOW)
}

fn float(value: &Scalar) -> Result<f64, HResult> {
    Ok(match value {
        Scalar::Empty | Scalar::Bool(false) => 0.0,
        Scalar::Bool(true) => -1.0,
        Scalar::Int(int) => *int as f64,
        Scalar::Float(float) | Scalar::Date(float) => *float,
        Scalar::Currency(scaled) => *scaled as f64 / 10_000.0,
        Scalar::Text(text) => float(&parse_number(text)?)?,
        Scalar::Error(_) => return Err(HResult::DISP_E_TYPEMISMATCH),
    })
}

fn currency(value: &Scalar) -> Result<Currency, HResult> {
    let scaled = match value {
        Scalar::Currency(scaled) => return Ok(Currency { int64: *scaled }),
        Scalar::Int(int) => int.checked_mul(10_000).ok_or(HResult::DISP_E_OVERFLOW)?,
        Scalar::Text(text) => return currency(&parse_number(text)?),
        other => round_float(float(other)? * 10_000.0)?,
    };
    i64::try_from(scaled)
        .map(|int64| Currency { int64 })
        .map_err(|_| HResult::DISP_E_OVERFLOW)
}

fn ole_date(value: &Scalar) -> Result<f64, HResult> {
    let days = match value {
        Scalar::Text(text) => match parse_number(text) {
            Ok(number) => float(&number)?,
            Err(_) => date::parse_ole_date(text).ok_or(HResult::DISP_E_TYPEMISMATCH)?,
        },
        other => float(other)?,
    };
    if !(date::MIN_OLE_DATE..=date::MAX_OLE_DATE).contains(&days) {
        return Err(HResult::DISP_E_OVERFLOW);
    }
    Ok(days)
}

fn boolean(value: &Scalar) -> Result<bool, HResult> {
    Ok(match value {
        Scalar::Empty => false,
        Scalar::Bool(flag) => *flag,
        Scalar::Int(int) => *int != 0,
        Scalar::Float(float) | Scalar::Date(float) => *float != 0.0,
        Scalar::Currency(scaled) => *scaled != 0,
        Scalar::Text(text) => {
            let trimmed = text.trim();
            if trimmed.eq_ignore_ascii_case("true") {
                true
            } else if trimmed.eq_ignore_ascii_case("false") {
                false
            } else {
                boolean(&parse_number(trimmed)?)?
            }
        }
        Scalar::Error(_) => return Err(HResult::DISP_E_TYPEMISMATCH),
    })
}

fn text(value: &Scalar) -> Result<String, HResult> {
    Ok(match value {
        Scalar::Empty => String::new(),
        Scalar::Int(int) => int.to_string(),
        Scalar::Float(float) => float.to_string(),
        Scalar::Currency(scaled) => Currency { int64: *scaled }.to_string(),
        Scalar::Date(days) => date::format_ole_date(*days).ok_or(HResult::DISP_E_OVERFLOW)?,
        // No VARIANT_ALPHABOOL: booleans become their numeric value.
        Scalar::Bool(true) => "-1".to_owned(),
        Scalar::Bool(false) => "0".to_owned(),
        Scalar::Text(text) => text.clone(),
        Scalar::Error(_) => return Err(HResult::DISP_E_TYPEMISMATCH),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_i4(value: i32) -> RawVariant {
        let mut raw = RawVariant::EMPTY;
        raw.vt = VarType::I4;
        raw.data.l_val = value;
        raw
    }

    fn convert(src: &RawVariant, to: VarType) -> Result<RawVariant, HResult> {
        unsafe { coerce(src, to) }
    }

    #[test]
    fn test_string_prefix_and_counters() {
        let before = live_resources();
        let units: Vec<u16> = "hello".encode_utf16().collect();
        unsafe {
            let text = alloc_string(&units).unwrap();
            assert_eq!(string_len(text), 5);
            assert_eq!(text.add(5).read(), 0);
            assert_eq!(live_resources().strings, before.strings + 1);
            free_string(text);
        }
        assert_eq!(live_resources(), before);
    }

    #[test]
    fn test_integer_narrowing_checks_range() {
        let ok = convert(&raw_i4(127), VarType::I1).unwrap();
        assert_eq!(unsafe { ok.data.c_val }, 127);
        assert_eq!(convert(&raw_i4(128), VarType::I1).err(), Some(HResult::DISP_E_OVERFLOW));
        assert_eq!(convert(&raw_i4(-1), VarType::UI2).err(), Some(HResult::DISP_E_OVERFLOW));
    }

    #[test]
    fn test_float_rounds_half_to_even() {
        let mut raw = RawVariant::EMPTY;
        raw.vt = VarType::R8;
        raw.data.dbl_val = 2.5;
        assert_eq!(unsafe { convert(&raw, VarType::I4).unwrap().data.l_val }, 2);
        raw.data.dbl_val = 3.5;
        assert_eq!(unsafe { convert(&raw, VarType::I4).unwrap().data.l_val }, 4);
    }

    #[test]
    fn test_bool_encoding_in_unsigned_targets() {
        let mut raw = RawVariant::EMPTY;
        raw.vt = VarType::BOOL;
        raw.data.bool_val = VARIANT_TRUE;
        assert_eq!(unsafe { convert(&raw, VarType::UI1).unwrap().data.b_val }, 255);
        assert_eq!(unsafe { convert(&raw, VarType::I4).unwrap().data.l_val }, -1);
        let back = convert(&raw_i4(7), VarType::BOOL).unwrap();
        assert_eq!(unsafe { back.data.bool_val }, VARIANT_TRUE);
    }

    #[test]
    fn test_bool_to_text_is_numeric() {
        let mut raw = RawVariant::EMPTY;
        raw.vt = VarType::BOOL;
        for (flag, expected) in [(VARIANT_TRUE, "-1"), (VARIANT_FALSE, "0")] {
            raw.data.bool_val = flag;
            let text = unsafe { Variant::from_raw(convert(&raw, VarType::BSTR).unwrap()) };
            assert_eq!(text.to_string(), expected);
        }
    }

    #[test]
    fn test_currency_scaling() {
        let cy = convert(&raw_i4(12), VarType::CY).unwrap();
        assert_eq!(unsafe { cy.data.cy_val.int64 }, 120_000);
        let mut raw = RawVariant::EMPTY;
        raw.vt = VarType::CY;
        raw.data.cy_val = Currency { int64: 25_000 };
        assert_eq!(unsafe { convert(&raw, VarType::I4).unwrap().data.l_val }, 2);
    }

    #[test]
    fn test_error_tag_does_not_mix_with_numbers() {
        assert_eq!(
            convert(&raw_i4(5), VarType::ERROR).err(),
            Some(HResult::DISP_E_TYPEMISMATCH)
        );
    }

    #[test]
    fn test_null_only_converts_to_itself_or_empty() {
        let mut raw = RawVariant::EMPTY;
        raw.vt = VarType::NULL;
        assert_eq!(convert(&raw, VarType::I4).err(), Some(HResult::DISP_E_TYPEMISMATCH));
        assert_eq!(convert(&raw, VarType::EMPTY).unwrap().vt, VarType::EMPTY);
    }

    #[test]
    fn test_vector_lifetime() {
        let before = live_resources();
        unsafe {
            let array = create_vector(VarType::I4, 3);
            assert!(!array.is_null());
            assert_eq!((*array).element_size, 4);
            assert_eq!(array_vartype(array), Ok(VarType::I4));
            let copy = copy_array(array).unwrap();
            assert_eq!(live_resources().arrays, before.arrays + 2);
            assert_eq!(destroy_array(copy), HResult::S_OK);
            assert_eq!(destroy_array(array), HResult::S_OK);
        }
        assert_eq!(live_resources(), before);
        assert!(unsafe { create_vector(VarType::RECORD, 1) }.is_null());
    }
}
