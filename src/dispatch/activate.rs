use log::{debug, info};
use windows::core::{IUnknown, HSTRING};
use windows::Win32::System::Com::{
    CLSIDFromProgID, CoCreateInstance, CoInitializeEx, CoUninitialize, IDispatch, CLSCTX,
    CLSCTX_ALL, CLSCTX_INPROC_SERVER, CLSCTX_LOCAL_SERVER, COINIT, COINIT_APARTMENTTHREADED,
    COINIT_MULTITHREADED,
};

use crate::com::Dispatch;
use crate::config::{ActivationContext, ApartmentModel};
use crate::error::{AutomationError, Result};
use crate::sys::HResult;

/// COM initialised on the current thread for as long as the guard lives.
#[derive(Debug)]
pub struct Apartment {
    // CoUninitialize must run on the thread that initialised.
    _not_send: std::marker::PhantomData<*mut ()>,
}

impl Apartment {
    pub fn enter(model: ApartmentModel) -> Result<Self> {
        let flags: COINIT = match model {
            ApartmentModel::SingleThreaded => COINIT_APARTMENTTHREADED,
            ApartmentModel::MultiThreaded => COINIT_MULTITHREADED,
        };
        // SAFETY: no reserved pointer; paired with CoUninitialize in Drop.
        let hr = unsafe { CoInitializeEx(None, flags) };
        if hr.is_err() {
            return Err(AutomationError::Activation {
                target: format!("{:?} apartment", model),
                code: HResult(hr.0),
            });
        }
        debug!("entered {:?} apartment", model);
        Ok(Apartment {
            _not_send: std::marker::PhantomData,
        })
    }
}

impl Drop for Apartment {
    fn drop(&mut self) {
        // SAFETY: balanced with the successful CoInitializeEx in `enter`.
        unsafe { CoUninitialize() };
    }
}

fn class_context(context: ActivationContext) -> CLSCTX {
    match context {
        ActivationContext::InprocServer => CLSCTX_INPROC_SERVER,
        ActivationContext::LocalServer => CLSCTX_LOCAL_SERVER,
        ActivationContext::Any => CLSCTX_ALL,
    }
}

/// Creates an instance of `prog_id` and returns its `IDispatch`.
pub fn activate(prog_id: &str, context: ActivationContext) -> Result<Dispatch> {
    let failed = |code: i32| AutomationError::Activation {
        target: prog_id.to_owned(),
        code: HResult(code),
    };
    if prog_id.contains('\0') {
        return Err(failed(HResult::E_INVALIDARG.0));
    }
    let prog_id_wide = HSTRING::from(prog_id);
    // SAFETY: plain activation calls; the HSTRING outlives the lookup.
    let dispatch: IDispatch = unsafe {
        let clsid = CLSIDFromProgID(&prog_id_wide).map_err(|e| failed(e.code().0))?;
        CoCreateInstance::<Option<&IUnknown>, IDispatch>(&clsid, None, class_context(context))
            .map_err(|e| failed(e.code().0))?
    };
    info!("activated {} ({:?})", prog_id, context);
    Ok(Dispatch::from(dispatch))
}
