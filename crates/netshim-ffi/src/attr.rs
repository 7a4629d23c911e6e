//! Attribute configuration by object path.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use netshim_engine::{config_path, AttributeValue};

use crate::abi::{ns3_attr, ns3_attr_kind, ns3_sim, ns3_status};
use crate::c_str;
use crate::context::call;
use crate::error::ShimError;

/// Converts a foreign tagged value into an engine attribute value.
///
/// # Safety
/// For string attributes, `attr.value.s` must be NULL or a NUL-terminated
/// string.
unsafe fn decode(attr: &ns3_attr) -> Result<AttributeValue, ShimError> {
    const BOOL: c_int = ns3_attr_kind::NS3_ATTR_BOOL as c_int;
    const UINT: c_int = ns3_attr_kind::NS3_ATTR_UINT as c_int;
    const DOUBLE: c_int = ns3_attr_kind::NS3_ATTR_DOUBLE as c_int;
    const STRING: c_int = ns3_attr_kind::NS3_ATTR_STRING as c_int;

    // SAFETY: the member read is the one `kind` selects; every member is
    // plain data.
    unsafe {
        match attr.kind {
            BOOL => Ok(AttributeValue::Bool(attr.value.b != 0)),
            UINT => Ok(AttributeValue::Uint(attr.value.u)),
            DOUBLE => Ok(AttributeValue::Double(attr.value.d)),
            STRING => {
                let ptr = attr.value.s;
                if ptr.is_null() {
                    return Err(ShimError::NullAttributeString);
                }
                CStr::from_ptr(ptr)
                    .to_str()
                    .map(|s| AttributeValue::String(s.to_owned()))
                    .map_err(|_| ShimError::InvalidUtf8("value"))
            }
            other => Err(ShimError::InvalidAttributeKind(other)),
        }
    }
}

/// Set an attribute on every object matched by a configuration path.
///
/// `path` selects objects, e.g. `"/NodeList/*/DeviceList/0"` or
/// `"/NodeList/[0-2]/ApplicationList/1"`; `attr_name` names the attribute on
/// them (`"Mtu"`, `"DataRate"`, `"Interval"`, ...). The value is converted to
/// the attribute's type; a string is parsed the way the attribute's own
/// textual form is.
///
/// The target is `path + "/" + attr_name`; a trailing `/` on `path` is
/// dropped first so `"/NodeList/0/"` and `"/NodeList/0"` name the same
/// objects.
///
/// # Returns
/// - `NS3_ERR` with `"Invalid attribute kind"` in the message for an unknown
///   `kind` or a NULL string value
/// - `NS3_ERR` if nothing matches or a value does not fit; objects matched
///   before the failing one keep their new value
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
/// - `path` and `attr_name` must be NUL-terminated strings
/// - a string `value` must point at a NUL-terminated string or be NULL
#[no_mangle]
pub unsafe extern "C" fn config_set(
    sim: ns3_sim,
    path: *const c_char,
    attr_name: *const c_char,
    value: ns3_attr,
) -> ns3_status {
    call("config_set", sim, |ctx| {
        // SAFETY: caller contract on strings and the attribute payload.
        let (path, name, value) = unsafe {
            (
                c_str(path, "path")?,
                c_str(attr_name, "attrName")?,
                decode(&value)?,
            )
        };
        let full_path = format!("{}/{}", path.trim_end_matches('/'), name);
        let updated = config_path::set(&ctx.sim, &full_path, &value)?;
        tracing::debug!(path = %full_path, kind = value.kind_name(), updated, "attribute set");
        Ok(())
    })
}
