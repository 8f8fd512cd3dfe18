use std::hash::Hasher;

/// A hasher optimized for hashing tag keys.
///
/// A `TagKey` hashes as its `TypeId`, which is already a unique value, so the
/// hasher passes it through rather than mixing it.
#[derive(Default)]
pub struct TagKeyHasher(u64);

impl Hasher for TagKeyHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        // TypeId hashes as a single 8- or 16-byte write depending on the
        // standard library version.
        for chunk in bytes.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            self.0 ^= u64::from_ne_bytes(word);
        }
    }

    fn write_u64(&mut self, n: u64) {
        self.0 = n;
    }

    fn write_u128(&mut self, n: u128) {
        self.0 = n as u64 ^ (n >> 64) as u64;
    }
}

#[test]
fn hasher() {
    use core::any::TypeId;
    use core::hash::Hash;

    fn hash_of<T: 'static + ?Sized>() -> u64 {
        let mut hasher = TagKeyHasher::default();
        TypeId::of::<T>().hash(&mut hasher);
        hasher.finish()
    }

    assert_eq!(hash_of::<usize>(), hash_of::<usize>());
    assert_ne!(hash_of::<usize>(), hash_of::<()>());
    assert_ne!(hash_of::<str>(), hash_of::<&'static str>());
}
