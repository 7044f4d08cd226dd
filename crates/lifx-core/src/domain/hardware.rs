//! Device identifiers and hardware identification.
//!
//! A bulb's identifier is its six-byte hardware (MAC) address packed into the
//! low bytes of a little-endian `u64`, exactly as it appears in the packet
//! header's target field.  Target `0` addresses every device.

/// Stable 64-bit identifier of a device, derived from its hardware address.
pub type DeviceId = u64;

/// Vendor identifier reported by genuine LIFX hardware.
pub const VENDOR_LIFX: u32 = 1;

/// Product identifier of the original LIFX bulb.
pub const PRODUCT_LIFX_ORIGINAL: u32 = 1;

/// Returns `true` when `vendor`/`product` identify an original-model light.
pub fn is_original_light(vendor: u32, product: u32) -> bool {
    vendor == VENDOR_LIFX && product == PRODUCT_LIFX_ORIGINAL
}

/// Formats a device identifier as a colon-separated hardware address,
/// e.g. `d0:73:d5:01:02:03`.
pub fn hardware_address(id: DeviceId) -> String {
    let bytes = id.to_le_bytes();
    bytes[..6]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
