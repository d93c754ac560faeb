//! Build-independent fingerprints for compile-cache keys.

use std::hash::{Hash, Hasher};

use crate::backend::spec::Program;

const FNV1A_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV1A_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a as a [`Hasher`]. Unlike `DefaultHasher`, its output does not change between
/// builds or processes.
#[derive(Debug, Clone, Copy)]
pub struct StableHasher(u64);

impl Default for StableHasher {
    fn default() -> Self {
        Self(FNV1A_OFFSET)
    }
}

impl Hasher for StableHasher {
    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(FNV1A_PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

pub fn fingerprint_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = StableHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Fingerprint of every operation kind in `program` together with its cache version.
///
/// Bumping [`Operation::cache_version`](crate::backend::spec::Operation::cache_version)
/// invalidates cached programs that use the operation.
pub fn op_versions_fingerprint(program: &Program) -> u64 {
    let mut hasher = StableHasher::default();
    for function in &program.functions {
        for instruction in &function.body {
            instruction.op.name().hash(&mut hasher);
            instruction.op.cache_version().hash(&mut hasher);
        }
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_reference_fnv1a_vectors() {
        assert_eq!(fingerprint_bytes(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fingerprint_bytes(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn empty_program_has_offset_fingerprint() {
        assert_eq!(
            op_versions_fingerprint(&Program::new("main")),
            FNV1A_OFFSET
        );
    }
}
