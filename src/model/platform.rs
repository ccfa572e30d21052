//! Platform matching for multi-platform index selection.

use oci_spec::image::Platform;

/// Compares two platforms for manifest-selection purposes: os, architecture
/// and variant always compared; `os_version` compared only when
/// `include_version` is set.
///
/// Per the open question in §9: the original's treatment of a null vs.
/// empty `os_version` under `include_version=true` is ambiguous. This
/// implementation treats an absent `os_version` the same as an empty one.
pub fn matches(a: &Platform, b: &Platform, include_version: bool) -> bool {
    if a.os() != b.os() || a.architecture() != b.architecture() {
        return false;
    }

    let variant_a = a.variant().as_deref().unwrap_or("");
    let variant_b = b.variant().as_deref().unwrap_or("");
    if variant_a != variant_b {
        return false;
    }

    if include_version {
        let version_a = a.os_version().as_deref().unwrap_or("");
        let version_b = b.os_version().as_deref().unwrap_or("");
        if version_a != version_b {
            return false;
        }
    }

    true
}
