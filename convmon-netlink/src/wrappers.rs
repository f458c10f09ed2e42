use std::ffi::CStr;

/// Resolve an interface index to its name via `if_indextoname(3)`.
///
/// Returns `None` when the index is not (or no longer) assigned; deleted
/// devices routinely show up in route messages after the interface is gone.
pub(crate) fn if_indextoname(index: u32) -> Option<String> {
    let mut buf = [0u8; nix::libc::IF_NAMESIZE];
    let ret = unsafe { nix::libc::if_indextoname(index, buf.as_mut_ptr().cast()) };
    if ret.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(buf.as_ptr().cast()) };
    name.to_str().ok().map(str::to_owned)
}
