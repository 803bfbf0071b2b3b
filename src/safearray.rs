//! Owned one-dimensional SAFEARRAYs with a statically known element type.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use crate::bstr::Bstr;
use crate::error::{AutomationError, Result};
use crate::ole;
use crate::sys::{SafeArrayDesc, VarType};
use crate::variant::{GetVariant, Kind, Native, RefTarget, Safe, SetVariant, Variant};

/// Element types a [`SafeArray`] can hold.
///
/// # Safety
/// `Self` must have exactly the in-memory layout of a `VT` element, and an all-zero bit pattern
/// must be a valid value.
pub unsafe trait ArrayElement: Sized {
    const VT: VarType;
}

unsafe impl<T: Native> ArrayElement for T {
    const VT: VarType = <T::Kind as Kind>::VT;
}

unsafe impl<K: Kind> ArrayElement for Safe<K> {
    const VT: VarType = K::VT;
}

unsafe impl ArrayElement for Bstr {
    const VT: VarType = VarType::BSTR;
}

unsafe impl ArrayElement for Variant {
    const VT: VarType = VarType::VARIANT;
}

/// An owned SAFEARRAY of `E`.
#[repr(transparent)]
pub struct SafeArray<E: ArrayElement> {
    desc: NonNull<SafeArrayDesc>,
    element: PhantomData<E>,
}

impl<E: ArrayElement> SafeArray<E> {
    /// A zero-initialised vector of `len` elements.
    pub fn new(len: usize) -> Result<Self> {
        let len = u32::try_from(len).map_err(|_| AutomationError::Allocation { what: "SAFEARRAY" })?;
        // SAFETY: create_vector returns null or a fresh array we now own.
        let desc = unsafe { ole::create_vector(E::VT, len) };
        NonNull::new(desc)
            .map(|desc| SafeArray {
                desc,
                element: PhantomData,
            })
            .ok_or(AutomationError::Allocation { what: "SAFEARRAY" })
    }

    /// Moves every element of `items` into a new array.
    pub fn from_vec(items: Vec<E>) -> Result<Self> {
        let mut array = Self::new(items.len())?;
        for (slot, item) in array.as_mut_slice().iter_mut().zip(items) {
            // The slot is still zeroed, so nothing is overwritten that needs dropping.
            // SAFETY: slot is a valid, properly aligned element.
            unsafe { ptr::write(slot, item) };
        }
        Ok(array)
    }

    /// Takes ownership of a raw SAFEARRAY after checking its element type and rank.
    ///
    /// On `Err` nothing is taken: the caller still owns `raw` and must release it.
    ///
    /// # Safety
    /// `raw` must be null or a live, owned SAFEARRAY.
    pub unsafe fn from_raw(raw: *mut SafeArrayDesc) -> Result<Self> {
        let desc = NonNull::new(raw).ok_or(AutomationError::Coercion {
            from: E::VT.array_of(),
            to: E::VT.array_of(),
            code: crate::sys::HResult::E_POINTER,
        })?;
        let actual = ole::array_vartype(raw)
            .map_err(|code| AutomationError::coercion(VarType::EMPTY.array_of(), E::VT.array_of(), code))?;
        if actual != E::VT || (*raw).dims != 1 {
            return Err(AutomationError::mismatch(actual.array_of(), E::VT.array_of()));
        }
        Ok(SafeArray {
            desc,
            element: PhantomData,
        })
    }

    /// Copies an array someone else owns. Only one-dimensional arrays are copied; the copy is
    /// released again if it turns out to hold the wrong element type.
    ///
    /// # Safety
    /// `raw` must point at a live SAFEARRAY.
    unsafe fn copy_from(raw: NonNull<SafeArrayDesc>, tag: VarType) -> Result<Self> {
        if (*raw.as_ptr()).dims != 1 {
            return Err(AutomationError::mismatch(tag, E::VT.array_of()));
        }
        let copy = ole::copy_array(raw.as_ptr())
            .map_err(|_| AutomationError::Allocation { what: "SAFEARRAY" })?;
        match SafeArray::from_raw(copy) {
            Ok(array) => Ok(array),
            Err(err) => {
                let hr = ole::destroy_array(copy);
                if hr.is_err() {
                    log::warn!("SafeArrayDestroy failed: {}", hr);
                }
                Err(err)
            }
        }
    }

    pub fn as_raw(&self) -> *mut SafeArrayDesc {
        self.desc.as_ptr()
    }

    pub fn into_raw(self) -> *mut SafeArrayDesc {
        let raw = self.as_raw();
        std::mem::forget(self);
        raw
    }

    pub fn element_vt(&self) -> VarType {
        E::VT
    }

    pub fn len(&self) -> usize {
        // SAFETY: we own a live descriptor.
        unsafe { (*self.as_raw()).bounds[0].elements as usize }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lower_bound(&self) -> i32 {
        // SAFETY: as above.
        unsafe { (*self.as_raw()).bounds[0].lower_bound }
    }

    pub fn as_slice(&self) -> &[E] {
        // SAFETY: the data block holds len() initialised elements of E.
        unsafe {
            let data = (*self.as_raw()).data.cast::<E>();
            if data.is_null() {
                &[]
            } else {
                std::slice::from_raw_parts(data, self.len())
            }
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [E] {
        // SAFETY: as above, and we hold the only reference.
        unsafe {
            let data = (*self.as_raw()).data.cast::<E>();
            if data.is_null() {
                &mut []
            } else {
                std::slice::from_raw_parts_mut(data, self.len())
            }
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.as_slice().iter()
    }

    /// Deep copy through the platform's array copy.
    pub fn try_clone(&self) -> Result<Self> {
        // SAFETY: we own a live array; a successful copy is a new owned array.
        let copy = unsafe { ole::copy_array(self.as_raw()) }
            .map_err(|_| AutomationError::Allocation { what: "SAFEARRAY" })?;
        NonNull::new(copy)
            .map(|desc| SafeArray {
                desc,
                element: PhantomData,
            })
            .ok_or(AutomationError::Allocation { what: "SAFEARRAY" })
    }
}

impl<E: ArrayElement + Clone> SafeArray<E> {
    pub fn from_slice(items: &[E]) -> Result<Self> {
        Self::from_vec(items.to_vec())
    }

    pub fn to_vec(&self) -> Vec<E> {
        self.as_slice().to_vec()
    }
}

impl<E: ArrayElement> Drop for SafeArray<E> {
    fn drop(&mut self) {
        // SAFETY: we own the array.
        let hr = unsafe { ole::destroy_array(self.as_raw()) };
        if hr.is_err() {
            log::warn!("SafeArrayDestroy failed: {}", hr);
        }
    }
}

impl<E: ArrayElement + fmt::Debug> fmt::Debug for SafeArray<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

impl<'a, E: ArrayElement> IntoIterator for &'a SafeArray<E> {
    type Item = &'a E;
    type IntoIter = std::slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<E: ArrayElement> SetVariant for SafeArray<E> {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        variant.store_array(E::VT, self.into_raw());
        Ok(())
    }
}

impl<E: ArrayElement> SetVariant for &SafeArray<E> {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        self.try_clone()?.set_into(variant)
    }
}

/// A null handle writes `VT_ARRAY | E::VT` with no array behind it.
impl<E: ArrayElement> SetVariant for Option<SafeArray<E>> {
    fn set_into(self, variant: &mut Variant) -> Result<()> {
        match self {
            Some(array) => array.set_into(variant),
            None => {
                variant.store_array(E::VT, ptr::null_mut());
                Ok(())
            }
        }
    }
}

/// Arrays are never coerced element-wise: the tag must already be `VT_ARRAY | E::VT`.
impl<E: ArrayElement> GetVariant for Option<SafeArray<E>> {
    fn get_from(variant: &mut Variant) -> Result<Self> {
        let expected = E::VT.array_of();
        if variant.vt() != expected {
            return Err(AutomationError::mismatch(variant.vt(), expected));
        }
        // SAFETY: the tag says the payload is null or an array of E owned by the variant.
        match NonNull::new(unsafe { variant.data().parray }) {
            None => Ok(None),
            Some(raw) => unsafe { SafeArray::copy_from(raw, expected) }.map(Some),
        }
    }
}

/// A null array handle is reported as `E_POINTER`.
impl<E: ArrayElement> GetVariant for SafeArray<E> {
    fn get_from(variant: &mut Variant) -> Result<Self> {
        Option::<SafeArray<E>>::get_from(variant)?.ok_or(AutomationError::Coercion {
            from: E::VT.array_of(),
            to: E::VT.array_of(),
            code: crate::sys::HResult::E_POINTER,
        })
    }
}

unsafe impl<E: ArrayElement> RefTarget for Option<SafeArray<E>> {
    const VT: VarType = VarType(E::VT.0 | VarType::ARRAY.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::VariantBool;

    #[test]
    fn test_numeric_vector() {
        let array = SafeArray::from_slice(&[1i32, 2, 3]).unwrap();
        assert_eq!(array.len(), 3);
        assert_eq!(array.lower_bound(), 0);
        assert_eq!(array.as_slice(), &[1, 2, 3]);
        assert_eq!(array.element_vt(), VarType::I4);
    }

    #[test]
    fn test_string_vector_round_trip_through_variant() {
        let names = vec![Bstr::from("alpha"), Bstr::from("beta")];
        let array = SafeArray::from_vec(names).unwrap();
        let mut variant = Variant::from_value(array).unwrap();
        assert_eq!(variant.vt(), VarType::BSTR.array_of());

        let copy = variant.get::<SafeArray<Bstr>>().unwrap();
        let text: Vec<String> = copy.iter().map(Bstr::to_string).collect();
        assert_eq!(text, ["alpha", "beta"]);
    }

    #[test]
    fn test_element_type_is_not_coerced() {
        let mut variant = Variant::from_value(SafeArray::from_slice(&[1i16]).unwrap()).unwrap();
        assert!(variant.get::<SafeArray<i32>>().is_err());
        assert_eq!(variant.vt(), VarType::I2.array_of());
    }

    #[test]
    fn test_copy_is_independent() {
        let mut original = SafeArray::from_slice(&[VariantBool::TRUE]).unwrap();
        let copy = original.try_clone().unwrap();
        original.as_mut_slice()[0] = VariantBool::FALSE;
        assert_eq!(copy.as_slice(), &[VariantBool::TRUE]);
    }

    #[test]
    fn test_empty_vector() {
        let array = SafeArray::<f64>::new(0).unwrap();
        assert!(array.is_empty());
        assert!(array.as_slice().is_empty());
    }

    #[test]
    fn test_variant_elements() {
        let items = vec![Variant::from_value(1u8).unwrap(), Variant::from_value("two").unwrap()];
        let array = SafeArray::from_vec(items).unwrap();
        let copy = array.try_clone().unwrap();
        drop(array);
        assert_eq!(copy.as_slice()[1].to_string(), "two");
    }

    #[test]
    fn test_ref_target_tag() {
        let mut slot: Option<SafeArray<Bstr>> = None;
        let mut variant = Variant::new();
        unsafe { variant.set_ref(&mut slot as *mut Option<SafeArray<Bstr>>) };
        assert_eq!(variant.vt(), VarType::BSTR.array_of().by_ref());
    }

    #[test]
    fn test_null_array_handle() {
        let mut variant = Variant::from_value(None::<SafeArray<i32>>).unwrap();
        assert_eq!(variant.vt(), VarType::I4.array_of());
        assert!(variant.get::<Option<SafeArray<i32>>>().unwrap().is_none());
        assert!(matches!(
            variant.get::<SafeArray<i32>>(),
            Err(AutomationError::Coercion { code: crate::sys::HResult::E_POINTER, .. })
        ));
        assert!(variant.get::<Option<SafeArray<i16>>>().is_err());

        variant.set(Some(SafeArray::from_slice(&[4i32, 5]).unwrap())).unwrap();
        let array = variant.get::<Option<SafeArray<i32>>>().unwrap().unwrap();
        assert_eq!(array.as_slice(), &[4, 5]);
    }

    #[test]
    fn test_from_raw_rejects_wrong_rank() {
        let array = SafeArray::from_slice(&[1i32, 2]).unwrap();
        let raw = array.into_raw();
        unsafe {
            (*raw).dims = 2;
            assert!(SafeArray::<i32>::from_raw(raw).is_err());
            (*raw).dims = 1;
            drop(SafeArray::<i32>::from_raw(raw).unwrap());
        }
    }

    #[cfg(not(windows))]
    #[test]
    fn test_rejected_extraction_releases_its_copy() {
        let before = ole::live_resources();
        // A two-dimensional array is refused before anything is copied.
        let mut variant = Variant::from_value(SafeArray::from_slice(&[1i32, 2]).unwrap()).unwrap();
        unsafe { (*variant.data().parray).dims = 2 };
        assert!(variant.get::<SafeArray<i32>>().is_err());
        assert_eq!(ole::live_resources().arrays, before.arrays + 1);
        unsafe { (*variant.data().parray).dims = 1 };
        drop(variant);

        // A tag that disagrees with the descriptor is refused after the copy, which is freed.
        let shorts = SafeArray::from_slice(&[1i16, 2]).unwrap();
        let mut raw = crate::sys::RawVariant::EMPTY;
        raw.vt = VarType::I4.array_of();
        raw.data.parray = shorts.into_raw();
        let mut variant = unsafe { Variant::from_raw(raw) };
        assert!(variant.get::<SafeArray<i32>>().is_err());
        assert_eq!(ole::live_resources().arrays, before.arrays + 1);
        drop(variant);
        assert_eq!(ole::live_resources(), before);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_arrays_do_not_leak() {
        let before = ole::live_resources();
        for _ in 0..1000 {
            let array = SafeArray::from_vec(vec![Bstr::from("a"), Bstr::from("b")]).unwrap();
            let mut variant = Variant::from_value(&array).unwrap();
            let _out = variant.get::<SafeArray<Bstr>>().unwrap();
        }
        assert_eq!(ole::live_resources(), before);
    }
}
