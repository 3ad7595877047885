const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Derives the member id of a node from its `host:port` address.
///
/// The id is the FNV-1a 64-bit hash of the address bytes. Zero is reserved
/// by the engine as "no node", so a zero hash is mapped to 1.
pub fn generate_id(address: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in address.as_bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    if hash == 0 {
        1
    } else {
        hash
    }
}
