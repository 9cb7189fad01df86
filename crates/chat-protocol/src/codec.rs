//! Binary value codec.
//!
//! Wire layouts (all integers big-endian):
//! - INTEGER: 4 bytes, signed.
//! - LONG: 8 bytes, signed.
//! - BOOLEAN: one byte, `0x00` or `0x01`.
//! - STRING: INTEGER byte length, then UTF-8 bytes.
//! - BYTES: INTEGER length, then raw bytes (`Blob`).
//! - UUID: two INTEGERs, generator then sequence.
//! - TIME: LONG milliseconds.
//! - NULLABLE(T): BOOLEAN present-flag, then T if present (`Option<T>`).
//! - COLLECTION(T): INTEGER count, then count values (`Vec<T>`).
//! - MAP(K,V): COLLECTION of K,V pairs (`Vec<(K, V)>`).
//!
//! Responses are buffered and written in one piece, so encoding is a plain
//! append into a `Vec<u8>`.  Request bodies arrive on a socket whose length
//! is unknown up front, so decoding reads values straight off an
//! `AsyncRead`.

use crate::error::WireError;
use crate::types::{Time, Uuid};
use tokio::io::{AsyncRead, AsyncReadExt};

// Collections pre-allocate at most this many slots before falling back to
// growth-on-push, so a hostile count cannot balloon memory.
const PREALLOC_LIMIT: usize = 1024;

/// A value with a frozen byte layout.
#[allow(async_fn_in_trait)]
pub trait Wire: Sized {
    /// Append this value's encoding to `buf`.
    fn put(&self, buf: &mut Vec<u8>);

    /// Decode one value from the stream.
    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError>;
}

impl Wire for i32 {
    fn put(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_be_bytes());
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        let mut bytes = [0u8; 4];
        r.read_exact(&mut bytes).await?;
        Ok(i32::from_be_bytes(bytes))
    }
}

impl Wire for i64 {
    fn put(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_be_bytes());
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        let mut bytes = [0u8; 8];
        r.read_exact(&mut bytes).await?;
        Ok(i64::from_be_bytes(bytes))
    }
}

impl Wire for bool {
    fn put(&self, buf: &mut Vec<u8>) {
        buf.push(u8::from(*self));
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        match r.read_u8().await? {
            0x00 => Ok(false),
            0x01 => Ok(true),
            other => Err(WireError::BadBoolean(other)),
        }
    }
}

impl Wire for String {
    fn put(&self, buf: &mut Vec<u8>) {
        (self.len() as i32).put(buf);
        buf.extend_from_slice(self.as_bytes());
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        let bytes = read_raw(r).await?;
        String::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)
    }
}

/// Raw BYTES value.  A newtype so `Vec<u8>` does not collide with
/// `COLLECTION(T)`'s blanket impl.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob(pub Vec<u8>);

impl Wire for Blob {
    fn put(&self, buf: &mut Vec<u8>) {
        (self.0.len() as i32).put(buf);
        buf.extend_from_slice(&self.0);
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        Ok(Blob(read_raw(r).await?))
    }
}

impl Wire for Uuid {
    fn put(&self, buf: &mut Vec<u8>) {
        (self.generator as i32).put(buf);
        (self.sequence as i32).put(buf);
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        let generator = i32::read(r).await? as u32;
        let sequence = i32::read(r).await? as u32;
        Ok(Uuid::new(generator, sequence))
    }
}

impl Wire for Time {
    fn put(&self, buf: &mut Vec<u8>) {
        self.0.put(buf);
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        Ok(Time(i64::read(r).await?))
    }
}

impl<T: Wire> Wire for Option<T> {
    fn put(&self, buf: &mut Vec<u8>) {
        match self {
            Some(value) => {
                true.put(buf);
                value.put(buf);
            }
            None => false.put(buf),
        }
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        if bool::read(r).await? {
            Ok(Some(T::read(r).await?))
        } else {
            Ok(None)
        }
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn put(&self, buf: &mut Vec<u8>) {
        (self.len() as i32).put(buf);
        for item in self {
            item.put(buf);
        }
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        let count = read_count(r).await?;
        let mut items = Vec::with_capacity(count.min(PREALLOC_LIMIT));
        for _ in 0..count {
            items.push(T::read(r).await?);
        }
        Ok(items)
    }
}

// MAP(K,V) is COLLECTION of pairs, so `Vec<(K, V)>` covers it.
impl<K: Wire, V: Wire> Wire for (K, V) {
    fn put(&self, buf: &mut Vec<u8>) {
        self.0.put(buf);
        self.1.put(buf);
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        let key = K::read(r).await?;
        let value = V::read(r).await?;
        Ok((key, value))
    }
}

/// Write a COLLECTION from a borrowing iterator, count first.
pub fn put_seq<'a, T, I>(buf: &mut Vec<u8>, items: I)
where
    T: Wire + 'a,
    I: ExactSizeIterator<Item = &'a T>,
{
    (items.len() as i32).put(buf);
    for item in items {
        item.put(buf);
    }
}

/// Write a MAP from a borrowing entry iterator, preserving iteration order.
pub fn put_map<'a, K, V, I>(buf: &mut Vec<u8>, entries: I)
where
    K: Wire + 'a,
    V: Wire + 'a,
    I: ExactSizeIterator<Item = (&'a K, &'a V)>,
{
    (entries.len() as i32).put(buf);
    for (key, value) in entries {
        key.put(buf);
        value.put(buf);
    }
}

async fn read_count<R: AsyncRead + Unpin>(r: &mut R) -> Result<usize, WireError> {
    let count = i32::read(r).await?;
    if count < 0 {
        return Err(WireError::NegativeLength(count));
    }
    Ok(count as usize)
}

async fn read_raw<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>, WireError> {
    let len = read_count(r).await?;
    let mut bytes = vec![0u8; len.min(PREALLOC_LIMIT)];
    if len <= PREALLOC_LIMIT {
        r.read_exact(&mut bytes).await?;
        return Ok(bytes);
    }
    // Large payloads are read in bounded chunks so the length prefix alone
    // cannot force a huge allocation.
    bytes.clear();
    let mut remaining = len;
    let mut chunk = [0u8; PREALLOC_LIMIT];
    while remaining > 0 {
        let take = remaining.min(PREALLOC_LIMIT);
        r.read_exact(&mut chunk[..take]).await?;
        bytes.extend_from_slice(&chunk[..take]);
        remaining -= take;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn round_trip<T: Wire + PartialEq + std::fmt::Debug>(value: T) {
        let mut buf = Vec::new();
        value.put(&mut buf);
        let mut cursor = buf.as_slice();
        let decoded = T::read(&mut cursor).await.expect("decode");
        assert_eq!(decoded, value);
        assert!(cursor.is_empty(), "trailing bytes after decode");
    }

    #[tokio::test]
    async fn primitive_round_trips() {
        round_trip(0i32).await;
        round_trip(-1i32).await;
        round_trip(i32::MAX).await;
        round_trip(i64::MIN).await;
        round_trip(true).await;
        round_trip(false).await;
        round_trip(String::from("hello")).await;
        round_trip(String::new()).await;
        round_trip(String::from("héllo wörld")).await;
        round_trip(Blob(vec![0, 1, 2, 255])).await;
        round_trip(Uuid::new(1, 7)).await;
        round_trip(Uuid::NULL).await;
        round_trip(Time(1_500_000_000_123)).await;
    }

    #[tokio::test]
    async fn nullable_round_trips() {
        round_trip(Some(Uuid::new(2, 9))).await;
        round_trip(None::<Uuid>).await;
        round_trip(Some(String::from("present"))).await;
    }

    #[tokio::test]
    async fn nested_collection_of_maps_round_trips() {
        let value: Vec<Vec<(Uuid, Time)>> = vec![
            vec![(Uuid::new(1, 1), Time(10)), (Uuid::new(1, 2), Time(20))],
            vec![],
            vec![(Uuid::new(3, 4), Time(-5))],
        ];
        round_trip(value).await;
    }

    #[tokio::test]
    async fn integer_layout_is_big_endian() {
        let mut buf = Vec::new();
        0x0102_0304i32.put(&mut buf);
        assert_eq!(buf, [0x01, 0x02, 0x03, 0x04]);
    }

    #[tokio::test]
    async fn string_layout_is_length_prefixed_utf8() {
        let mut buf = Vec::new();
        String::from("hi").put(&mut buf);
        assert_eq!(buf, [0, 0, 0, 2, b'h', b'i']);
    }

    #[tokio::test]
    async fn uuid_layout_is_two_integers() {
        let mut buf = Vec::new();
        Uuid::new(1, 3).put(&mut buf);
        assert_eq!(buf, [0, 0, 0, 1, 0, 0, 0, 3]);
    }

    #[tokio::test]
    async fn nullable_absent_is_a_single_zero_byte() {
        let mut buf = Vec::new();
        None::<Uuid>.put(&mut buf);
        assert_eq!(buf, [0x00]);
    }

    #[tokio::test]
    async fn truncated_input_fails() {
        let mut buf = Vec::new();
        String::from("truncate me").put(&mut buf);
        buf.truncate(buf.len() - 3);
        let mut cursor = buf.as_slice();
        assert!(matches!(
            String::read(&mut cursor).await,
            Err(WireError::Io(_))
        ));
    }

    #[tokio::test]
    async fn negative_length_fails() {
        let mut buf = Vec::new();
        (-4i32).put(&mut buf);
        let mut cursor = buf.as_slice();
        assert!(matches!(
            String::read(&mut cursor).await,
            Err(WireError::NegativeLength(-4))
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_fails() {
        let mut buf = Vec::new();
        2i32.put(&mut buf);
        buf.extend_from_slice(&[0xff, 0xfe]);
        let mut cursor = buf.as_slice();
        assert!(matches!(
            String::read(&mut cursor).await,
            Err(WireError::InvalidUtf8)
        ));
    }

    #[tokio::test]
    async fn bad_boolean_byte_fails() {
        let buf = [0x02u8];
        let mut cursor = buf.as_slice();
        assert!(matches!(
            bool::read(&mut cursor).await,
            Err(WireError::BadBoolean(0x02))
        ));
    }

    #[tokio::test]
    async fn put_map_preserves_entry_order() {
        let mut ordered = std::collections::BTreeMap::new();
        ordered.insert(Uuid::new(1, 2), Time(2));
        ordered.insert(Uuid::new(1, 1), Time(1));
        let mut buf = Vec::new();
        put_map(&mut buf, ordered.iter());
        let mut cursor = buf.as_slice();
        let decoded = Vec::<(Uuid, Time)>::read(&mut cursor).await.unwrap();
        assert_eq!(
            decoded,
            vec![(Uuid::new(1, 1), Time(1)), (Uuid::new(1, 2), Time(2))]
        );
    }
}
