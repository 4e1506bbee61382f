use std::cmp::Ordering;
use std::fmt::Debug;
use std::mem::size_of;

/// A fixed-width scalar that can be stored as a key or a value.
///
/// Run files are dense arrays of `(key, value)` records, so both halves must
/// encode to a constant number of bytes. `MIN` and `MAX` are reserved:
/// keys use them as the head/tail sentinels of a memtable run, values use
/// `MIN` as the tombstone. The usable domain is therefore slightly smaller
/// than the type's full range.
pub trait FixedWidth: Copy + Ord + Debug + Send + Sync + 'static {
    /// Encoded size in bytes.
    const WIDTH: usize;
    /// Smallest value of the type.
    const MIN: Self;
    /// Largest value of the type.
    const MAX: Self;

    /// Write the little-endian encoding into `out[..WIDTH]`.
    fn encode(self, out: &mut [u8]);

    /// Read a value back from `bytes[..WIDTH]`.
    fn decode(bytes: &[u8]) -> Self;

    /// Run `f` over the encoded bytes without allocating.
    fn with_bytes<R>(self, f: impl FnOnce(&[u8]) -> R) -> R;
}

macro_rules! impl_fixed_width {
    ($($t:ty),* $(,)?) => {$(
        impl FixedWidth for $t {
            const WIDTH: usize = size_of::<$t>();
            const MIN: Self = <$t>::MIN;
            const MAX: Self = <$t>::MAX;

            fn encode(self, out: &mut [u8]) {
                out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
            }

            fn decode(bytes: &[u8]) -> Self {
                let mut raw = [0u8; size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                <$t>::from_le_bytes(raw)
            }

            fn with_bytes<R>(self, f: impl FnOnce(&[u8]) -> R) -> R {
                f(&self.to_le_bytes())
            }
        }
    )*};
}

impl_fixed_width!(i32, i64, u32, u64);

/// One record of a run. Ordered by key only.
#[derive(Debug, Clone, Copy)]
pub struct KVPair<K, V> {
    pub key: K,
    pub value: V,
}

impl<K: FixedWidth, V: FixedWidth> KVPair<K, V> {
    /// Encoded record size: key bytes followed by value bytes.
    pub const WIDTH: usize = K::WIDTH + V::WIDTH;

    pub fn new(key: K, value: V) -> Self {
        KVPair { key, value }
    }

    /// A logical delete of `key`.
    pub fn tombstone(key: K) -> Self {
        KVPair { key, value: V::MIN }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value == V::MIN
    }

    /// Encode into `out[..WIDTH]`.
    pub fn encode(&self, out: &mut [u8]) {
        self.key.encode(&mut out[..K::WIDTH]);
        self.value.encode(&mut out[K::WIDTH..Self::WIDTH]);
    }

    /// Decode from `bytes[..WIDTH]`.
    pub fn decode(bytes: &[u8]) -> Self {
        KVPair {
            key: K::decode(&bytes[..K::WIDTH]),
            value: V::decode(&bytes[K::WIDTH..Self::WIDTH]),
        }
    }

    /// Encode a slice of records into one contiguous buffer.
    pub fn encode_all(pairs: &[Self]) -> Vec<u8> {
        let mut buf = vec![0u8; pairs.len() * Self::WIDTH];
        for (pair, chunk) in pairs.iter().zip(buf.chunks_exact_mut(Self::WIDTH)) {
            pair.encode(chunk);
        }
        buf
    }

    /// Decode a contiguous buffer of whole records.
    pub fn decode_all(bytes: &[u8]) -> Vec<Self> {
        bytes.chunks_exact(Self::WIDTH).map(Self::decode).collect()
    }
}

impl<K: PartialEq, V> PartialEq for KVPair<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<K: Eq, V> Eq for KVPair<K, V> {}

impl<K: Ord, V> PartialOrd for KVPair<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, V> Ord for KVPair<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}
