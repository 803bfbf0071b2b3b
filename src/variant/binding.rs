//! The type → tag table.
//!
//! Value entries go through [`SetVariant`] / [`GetVariant`]; pointer entries through
//! [`RefTarget`]. Scalars are covered once, generically, by the [`Kind`] rows: every Rust native
//! has a default kind and every kind can be named explicitly with [`Safe`].

use widestring::{U16CStr, U16Str};

use super::safe::{kind, Kind, Safe};
use super::Variant;
use crate::bstr::Bstr;
use crate::com::{Dispatch, Unknown};
use crate::error::{AutomationError, Result};
use crate::sys::{Currency, Decimal, HResult, VarType, VARIANT_FALSE, VARIANT_TRUE};

mod sealed {
    pub trait Sealed {}
}

/// Rust scalars with a default automation tag.
pub trait Native: Copy + sealed::Sealed + 'static {
    type Kind: Kind<Storage = Self>;
}

macro_rules! natives {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Native for $ty {
                type Kind = kind::$kind;
            }
        )*
    };
}

natives! {
    i8 => I1,
    u8 => UI1,
    i16 => I2,
    u16 => UI2,
    i32 => I4,
    u32 => UI4,
    i64 => I8,
    u64 => UI8,
    f32 => R4,
    f64 => R8,
    Currency => Cy,
}

/// Writes a value into a variant, releasing whatever it held before.
pub trait SetVariant {
    fn set_into(self, variant: &mut Variant) -> Result<()>;
}

/// Reads a value out of a variant, coercing the variant in place first when its tag differs.
pub trait GetVariant: Sized {
    fn get_from(variant: &mut Variant) -> Result<Self>;
}

/// Storage a `VT_BYREF` variant may point at.
///
/// # Safety
/// `VT` must describe the exact in-memory layout of `Self`.
pub unsafe trait RefTarget {
    const VT: VarType;
}

/// Sets `VT_NULL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Null;

/// Sets `VT_EMPTY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Empty;

impl<T: Native> SetVariant for T {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        variant.store::<T::Kind>(self);
        Ok(())
    }
}

impl<T: Native> GetVariant for T {
    fn get_from(variant: &mut Variant) -> Result<Self> {
        variant.load::<T::Kind>()
    }
}

unsafe impl<T: Native> RefTarget for T {
    const VT: VarType = <T::Kind as Kind>::VT;
}

impl<K: Kind> SetVariant for Safe<K> {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        variant.store::<K>(self.get());
        Ok(())
    }
}

impl<K: Kind> GetVariant for Safe<K> {
    fn get_from(variant: &mut Variant) -> Result<Self> {
        variant.load::<K>().map(Safe::new)
    }
}

impl SetVariant for bool {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        let raw = if self { VARIANT_TRUE } else { VARIANT_FALSE };
        variant.store::<kind::Bool>(raw);
        Ok(())
    }
}

impl GetVariant for bool {
    fn get_from(variant: &mut Variant) -> Result<Self> {
        Ok(variant.load::<kind::Bool>()? != VARIANT_FALSE)
    }
}

impl SetVariant for Null {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        variant.clear();
        variant.0.vt = VarType::NULL;
        Ok(())
    }
}

impl SetVariant for Empty {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        variant.clear();
        Ok(())
    }
}

// Strings. A `Bstr` by value is adopted; everything else is copied into a new allocation.

impl SetVariant for Bstr {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        variant.clear();
        variant.0.data.bstr_val = self.into_raw();
        variant.0.vt = VarType::BSTR;
        Ok(())
    }
}

impl SetVariant for &Bstr {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        Bstr::from_wide(self.as_wide())?.set_into(variant)
    }
}

impl SetVariant for &str {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        Bstr::from_str_checked(self)?.set_into(variant)
    }
}

impl SetVariant for String {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        self.as_str().set_into(variant)
    }
}

impl SetVariant for &U16CStr {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        Bstr::from_wide(self.as_slice())?.set_into(variant)
    }
}

impl SetVariant for &U16Str {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        Bstr::from_wide(self.as_slice())?.set_into(variant)
    }
}

impl GetVariant for Bstr {
    fn get_from(variant: &mut Variant) -> Result<Self> {
        variant.change_type(VarType::BSTR)?;
        // SAFETY: the tag is VT_BSTR, so the payload is a BSTR owned by the variant.
        let units = unsafe { crate::ole::string_units(variant.0.data.bstr_val) };
        Bstr::from_wide(units)
    }
}

impl GetVariant for String {
    fn get_from(variant: &mut Variant) -> Result<Self> {
        variant.change_type(VarType::BSTR)?;
        // SAFETY: as above.
        let units = unsafe { crate::ole::string_units(variant.0.data.bstr_val) };
        String::from_utf16(units).map_err(|_| AutomationError::mismatch(VarType::BSTR, VarType::BSTR))
    }
}

unsafe impl RefTarget for Bstr {
    const VT: VarType = VarType::BSTR;
}

// Interface references. Owned references are adopted, borrowed ones AddRef'd.

macro_rules! interface_binding {
    ($ty:ident, $vt:ident) => {
        impl SetVariant for $ty {
            fn set_into(self, variant: &mut Variant) -> Result<()> {
                Some(self).set_into(variant)
            }
        }

        impl SetVariant for &$ty {
            fn set_into(self, variant: &mut Variant) -> Result<()> {
                Some(self.clone()).set_into(variant)
            }
        }

        impl SetVariant for Option<$ty> {
            fn set_into(self, variant: &mut Variant) -> Result<()> {
                variant.clear();
                variant.0.data.punk_val = self.map_or(std::ptr::null_mut(), $ty::into_raw);
                variant.0.vt = VarType::$vt;
                Ok(())
            }
        }

        impl GetVariant for Option<$ty> {
            fn get_from(variant: &mut Variant) -> Result<Self> {
                variant.change_type(VarType::$vt)?;
                // SAFETY: the tag guarantees the payload is null or a live reference we keep.
                Ok(unsafe { $ty::from_raw_borrowed(variant.0.data.punk_val) })
            }
        }

        /// A null reference ("Nothing") is reported as `E_POINTER`.
        impl GetVariant for $ty {
            fn get_from(variant: &mut Variant) -> Result<Self> {
                Option::<$ty>::get_from(variant)?.ok_or(AutomationError::Coercion {
                    from: VarType::$vt,
                    to: VarType::$vt,
                    code: HResult::E_POINTER,
                })
            }
        }

        unsafe impl RefTarget for Option<$ty> {
            const VT: VarType = VarType::$vt;
        }
    };
}

interface_binding!(Unknown, UNKNOWN);
interface_binding!(Dispatch, DISPATCH);

// Nested variants: moved in, deep-copied out.

impl SetVariant for Variant {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        *variant = self;
        Ok(())
    }
}

impl SetVariant for &Variant {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        *variant = self.try_clone()?;
        Ok(())
    }
}

impl GetVariant for Variant {
    fn get_from(variant: &mut Variant) -> Result<Self> {
        variant.try_clone()
    }
}

unsafe impl RefTarget for Variant {
    const VT: VarType = VarType::VARIANT;
}

unsafe impl RefTarget for Decimal {
    const VT: VarType = VarType::DECIMAL;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safearray::SafeArray;
    use crate::variant::{Date, ErrorCode, Int, UInt, VariantBool};

    fn round_trip<T>(value: T, vt: VarType)
    where
        T: SetVariant + GetVariant + PartialEq + std::fmt::Debug + Copy,
    {
        let mut variant = Variant::new();
        variant.set(value).unwrap();
        assert_eq!(variant.vt(), vt);
        assert_eq!(variant.get::<T>().unwrap(), value);
        assert_eq!(variant.vt(), vt);
    }

    #[test]
    fn test_native_rows_round_trip() {
        round_trip(-5i8, VarType::I1);
        round_trip(200u8, VarType::UI1);
        round_trip(-1234i16, VarType::I2);
        round_trip(60_000u16, VarType::UI2);
        round_trip(-70_000i32, VarType::I4);
        round_trip(4_000_000_000u32, VarType::UI4);
        round_trip(i64::MIN, VarType::I8);
        round_trip(u64::MAX, VarType::UI8);
        round_trip(1.5f32, VarType::R4);
        round_trip(-2.25f64, VarType::R8);
        round_trip(Currency::from_scaled(123_456), VarType::CY);
        round_trip(true, VarType::BOOL);
        round_trip(false, VarType::BOOL);
    }

    #[test]
    fn test_safe_rows_round_trip() {
        round_trip(ErrorCode::from(HResult::DISP_E_PARAMNOTFOUND), VarType::ERROR);
        round_trip(Date::new(36_526.5), VarType::DATE);
        round_trip(Int::new(-7), VarType::INT);
        round_trip(UInt::new(7), VarType::UINT);
        round_trip(VariantBool::FALSE, VarType::BOOL);
    }

    #[test]
    fn test_bool_uses_variant_bool_encoding() {
        let mut variant = Variant::from_value(true).unwrap();
        assert_eq!(variant.get::<VariantBool>().unwrap().get(), -1);
        variant.set(false).unwrap();
        assert_eq!(variant.get::<VariantBool>().unwrap().get(), 0);
    }

    #[test]
    fn test_null_and_empty() {
        let mut variant = Variant::from_value(3i32).unwrap();
        variant.set(Null).unwrap();
        assert_eq!(variant.vt(), VarType::NULL);
        assert!(variant.get::<i32>().is_err());
        variant.set(Empty).unwrap();
        assert_eq!(variant.vt(), VarType::EMPTY);
        assert_eq!(variant.get::<i32>().unwrap(), 0);
    }

    #[test]
    fn test_strings() {
        let mut variant = Variant::from_value("notepad.exe").unwrap();
        assert_eq!(variant.vt(), VarType::BSTR);
        assert_eq!(variant.get::<String>().unwrap(), "notepad.exe");
        assert_eq!(variant.get::<Bstr>().unwrap().to_string(), "notepad.exe");
        variant.set(String::from("42")).unwrap();
        assert_eq!(variant.get::<i32>().unwrap(), 42);
        assert_eq!(variant.vt(), VarType::I4);
    }

    fn pointer_row<T: RefTarget>(target: &mut T, vt: VarType) {
        let target: *mut T = target;
        let mut variant = Variant::new();
        unsafe { variant.set_ref(target) };
        assert_eq!(variant.vt(), vt.by_ref());
        assert_eq!(variant.get_ref::<T>().unwrap(), target);

        unsafe { variant.set_ref::<T>(std::ptr::null_mut()) };
        assert_eq!(variant.vt(), vt.by_ref());
        assert!(variant.get_ref::<T>().unwrap().is_null());
    }

    fn safe_pointer_row<K: Kind>(mut slot: K::Storage) {
        let target: *mut K::Storage = &mut slot;
        let mut variant = Variant::new();
        unsafe { variant.set_safe_ref::<K>(target) };
        assert_eq!(variant.vt(), K::VT.by_ref());
        assert_eq!(variant.get_safe_ref::<K>().unwrap(), target);

        unsafe { variant.set_safe_ref::<K>(std::ptr::null_mut()) };
        assert_eq!(variant.vt(), K::VT.by_ref());
        assert!(variant.get_safe_ref::<K>().unwrap().is_null());
    }

    #[test]
    fn test_pointer_rows() {
        pointer_row(&mut 0i8, VarType::I1);
        pointer_row(&mut 0u8, VarType::UI1);
        pointer_row(&mut 0i16, VarType::I2);
        pointer_row(&mut 0u16, VarType::UI2);
        pointer_row(&mut 0i32, VarType::I4);
        pointer_row(&mut 0u32, VarType::UI4);
        pointer_row(&mut 0i64, VarType::I8);
        pointer_row(&mut 0u64, VarType::UI8);
        pointer_row(&mut 0f32, VarType::R4);
        pointer_row(&mut 0f64, VarType::R8);
        pointer_row(&mut Currency::default(), VarType::CY);
        pointer_row(&mut Decimal::default(), VarType::DECIMAL);
        pointer_row(&mut Bstr::default(), VarType::BSTR);
        pointer_row(&mut Variant::new(), VarType::VARIANT);
        pointer_row(&mut None::<Unknown>, VarType::UNKNOWN);
        pointer_row(&mut None::<Dispatch>, VarType::DISPATCH);
        pointer_row(&mut None::<SafeArray<f64>>, VarType::R8.array_of());
    }

    #[test]
    fn test_safe_pointer_rows() {
        safe_pointer_row::<kind::I1>(0);
        safe_pointer_row::<kind::UI1>(0);
        safe_pointer_row::<kind::I2>(0);
        safe_pointer_row::<kind::UI2>(0);
        safe_pointer_row::<kind::I4>(0);
        safe_pointer_row::<kind::UI4>(0);
        safe_pointer_row::<kind::I8>(0);
        safe_pointer_row::<kind::UI8>(0);
        safe_pointer_row::<kind::Int>(0);
        safe_pointer_row::<kind::UInt>(0);
        safe_pointer_row::<kind::R4>(0.0);
        safe_pointer_row::<kind::R8>(0.0);
        safe_pointer_row::<kind::Cy>(Currency::default());
        safe_pointer_row::<kind::Date>(0.0);
        safe_pointer_row::<kind::Error>(0);
        safe_pointer_row::<kind::Bool>(VARIANT_FALSE);
    }

    #[test]
    fn test_written_through_pointer() {
        let mut slot = 0u32;
        let mut variant = Variant::new();
        unsafe { variant.set_ref(&mut slot as *mut u32) };
        unsafe { *variant.get_ref::<u32>().unwrap() = 77 };
        assert_eq!(slot, 77);
    }

    #[test]
    fn test_null_interface_rows() {
        let mut variant = Variant::from_value(None::<Dispatch>).unwrap();
        assert_eq!(variant.vt(), VarType::DISPATCH);
        assert!(variant.get::<Option<Dispatch>>().unwrap().is_none());
        assert!(matches!(
            variant.get::<Dispatch>(),
            Err(AutomationError::Coercion { code: HResult::E_POINTER, .. })
        ));

        variant.set(None::<Unknown>).unwrap();
        assert_eq!(variant.vt(), VarType::UNKNOWN);
        assert!(variant.get::<Option<Unknown>>().unwrap().is_none());
        assert!(variant.get::<Unknown>().is_err());
    }

    #[test]
    fn test_null_array_row() {
        let mut variant = Variant::from_value(None::<SafeArray<Bstr>>).unwrap();
        assert_eq!(variant.vt(), VarType::BSTR.array_of());
        assert!(variant.get::<Option<SafeArray<Bstr>>>().unwrap().is_none());
        assert_eq!(variant.try_clone().unwrap().vt(), VarType::BSTR.array_of());
        assert_eq!(variant.to_string(), "<VT_ARRAY|VT_BSTR null>");
    }

    #[test]
    fn test_wide_string_setters() {
        let terminated = widestring::U16CString::from_str("wide").unwrap();
        let mut variant = Variant::from_value(terminated.as_ucstr()).unwrap();
        assert_eq!(variant.vt(), VarType::BSTR);
        assert_eq!(variant.get::<String>().unwrap(), "wide");

        let slice = widestring::U16String::from_str("slice");
        variant.set(slice.as_ustr()).unwrap();
        assert_eq!(variant.vt(), VarType::BSTR);
        assert_eq!(variant.get::<String>().unwrap(), "slice");
    }

    #[test]
    fn test_nested_variant_is_deep_copied() {
        let inner = Variant::from_value("inner").unwrap();
        let mut outer = Variant::new();
        outer.set(&inner).unwrap();
        drop(inner);
        assert_eq!(outer.get::<String>().unwrap(), "inner");
    }
}
