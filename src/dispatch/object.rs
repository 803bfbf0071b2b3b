use std::ptr;

use widestring::U16CStr;

use super::InvokeKind;
use crate::bstr::Bstr;
use crate::com::Dispatch;
use crate::error::{Result, ServerError};
use crate::ole;
use crate::sys::{DispId, DispParams, ExcepInfo, Guid, HResult, RawVariant, DISPID_UNKNOWN};
use crate::variant::Variant;

/// One call as the server sees it.
pub struct Invocation<'c> {
    pub dispid: DispId,
    pub lcid: u32,
    pub kind: InvokeKind,
    /// Arguments in wire order: named arguments first, positional arguments last-declared first.
    pub args: &'c mut [Variant],
    pub named_args: &'c [DispId],
}

/// The two `IDispatch` entry points a client needs.
///
/// [`Dispatch`] implements this over the raw vtable. Anything else that can answer name lookups
/// and invocations (an in-process object, a test double) can stand in for it.
pub trait AutomationObject {
    fn ids_of_names(&self, name: &U16CStr, lcid: u32) -> std::result::Result<DispId, HResult>;

    /// Performs the call. `DISP_E_EXCEPTION` means `excep` has been filled in; `arg_err` is the
    /// wire index of the offending argument for `DISP_E_TYPEMISMATCH` and
    /// `DISP_E_PARAMNOTFOUND`.
    fn invoke(
        &self,
        call: Invocation<'_>,
        result: Option<&mut Variant>,
        excep: &mut ExcepInfo,
        arg_err: &mut u32,
    ) -> HResult;
}

impl AutomationObject for Dispatch {
    fn ids_of_names(&self, name: &U16CStr, lcid: u32) -> std::result::Result<DispId, HResult> {
        let names = [name.as_ptr()];
        let mut id = DISPID_UNKNOWN;
        let iid = Guid::zeroed();
        // SAFETY: one valid, null-terminated name and one output slot.
        let hr = unsafe {
            (self.vtable().get_ids_of_names)(self.as_raw(), &iid, names.as_ptr(), 1, lcid, &mut id)
        };
        hr.ok().map(|()| id)
    }

    fn invoke(
        &self,
        call: Invocation<'_>,
        result: Option<&mut Variant>,
        excep: &mut ExcepInfo,
        arg_err: &mut u32,
    ) -> HResult {
        let mut params = DispParams {
            args: if call.args.is_empty() {
                ptr::null_mut()
            } else {
                call.args.as_mut_ptr().cast::<RawVariant>()
            },
            named_args: if call.named_args.is_empty() {
                ptr::null_mut()
            } else {
                call.named_args.as_ptr().cast_mut()
            },
            arg_count: call.args.len() as u32,
            named_arg_count: call.named_args.len() as u32,
        };
        let result = result.map_or(ptr::null_mut(), Variant::as_mut_ptr);
        let iid = Guid::zeroed();
        // SAFETY: every pointer is null or valid for the duration of the call, and `Variant` is
        // layout-identical to `VARIANT`.
        unsafe {
            (self.vtable().invoke)(
                self.as_raw(),
                call.dispid,
                &iid,
                call.lcid,
                call.kind.flags(),
                &mut params,
                result,
                excep,
                arg_err,
            )
        }
    }
}

impl Default for ExcepInfo {
    fn default() -> Self {
        ExcepInfo {
            code: 0,
            reserved: 0,
            source: ptr::null_mut(),
            description: ptr::null_mut(),
            help_file: ptr::null_mut(),
            help_context: 0,
            reserved_ptr: ptr::null_mut(),
            deferred_fill_in: None,
            scode: 0,
        }
    }
}

impl Drop for ExcepInfo {
    fn drop(&mut self) {
        for text in [&mut self.source, &mut self.description, &mut self.help_file] {
            // SAFETY: the strings are BSTRs handed to us by the server, or null.
            unsafe { ole::free_string(*text) };
            *text = ptr::null_mut();
        }
    }
}

fn take_string(slot: &mut *mut u16) -> String {
    // SAFETY: the slot holds an owned BSTR or null, and is emptied here.
    let text = unsafe { Bstr::from_raw(std::mem::replace(slot, ptr::null_mut())) };
    text.to_string_lossy()
}

impl ExcepInfo {
    /// Reports an exception the way a server does: `scode` plus source and description.
    pub fn raise(&mut self, code: HResult, source: &str, description: &str) -> Result<()> {
        let source = Bstr::from_str_checked(source)?;
        let description = Bstr::from_str_checked(description)?;
        *self = ExcepInfo {
            source: source.into_raw(),
            description: description.into_raw(),
            scode: code.0,
            ..ExcepInfo::default()
        };
        Ok(())
    }

    /// Runs any deferred fill-in and moves the details out.
    pub(crate) fn take_server_error(&mut self) -> ServerError {
        if let Some(fill_in) = self.deferred_fill_in.take() {
            // SAFETY: the server asked for this callback to be run on its own structure.
            let hr = unsafe { fill_in(self) };
            if hr.is_err() {
                log::debug!("deferred exception fill-in failed: {}", hr);
            }
        }
        let code = if self.scode != 0 {
            HResult(self.scode)
        } else {
            HResult::from_wcode(self.code)
        };
        ServerError {
            code,
            source: take_string(&mut self.source),
            description: take_string(&mut self.description),
            help_file: take_string(&mut self.help_file),
            help_context: self.help_context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_and_take() {
        let mut excep = ExcepInfo::default();
        excep.raise(HResult::E_FAIL, "Shell", "it broke").unwrap();
        let error = excep.take_server_error();
        assert_eq!(error.code, HResult::E_FAIL);
        assert_eq!(error.source, "Shell");
        assert_eq!(error.description, "it broke");
        assert!(error.help_file.is_empty());
        assert!(excep.source.is_null());
    }

    #[test]
    fn test_wcode_used_when_scode_is_zero() {
        let mut excep = ExcepInfo {
            code: 1000,
            ..ExcepInfo::default()
        };
        assert_eq!(excep.take_server_error().code, HResult::from_wcode(1000));
    }

    unsafe extern "system" fn fill_in(excep: *mut ExcepInfo) -> HResult {
        (*excep).scode = HResult::E_INVALIDARG.0;
        (*excep).description = Bstr::from("filled late").into_raw();
        HResult::S_OK
    }

    #[test]
    fn test_deferred_fill_in_runs_once() {
        let mut excep = ExcepInfo {
            deferred_fill_in: Some(fill_in),
            ..ExcepInfo::default()
        };
        let error = excep.take_server_error();
        assert_eq!(error.code, HResult::E_INVALIDARG);
        assert_eq!(error.description, "filled late");
        assert!(excep.deferred_fill_in.is_none());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_drop_frees_strings() {
        let before = ole::live_resources();
        {
            let mut excep = ExcepInfo::default();
            excep.raise(HResult::E_FAIL, "a", "b").unwrap();
        }
        assert_eq!(ole::live_resources(), before);
    }
}
