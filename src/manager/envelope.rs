//! Envelope and chunk-record I/O against any backend.
//!
//! Shared by the primary write path and sync replay.
//!
//! # Layout
//!
//! A payload up to `chunk_size` bytes lives inline in the envelope stored
//! under `key`. A larger payload is split into records `{key}#chunk{i}`,
//! `i` in `0..chunks`, and the envelope keeps an empty `value` plus the
//! chunk count. The checksum always covers the whole reassembled payload.
//!
//! # Write ordering
//!
//! The envelope is the commit point. Backends offer no transactions, so the
//! order of single-record writes decides what a crash or a failed write can
//! leave behind:
//!
//! 1. Chunk records are written first, in index order.
//! 2. The envelope is written last. Until it lands, readers see the previous
//!    envelope (or nothing).
//! 3. Chunk records beyond the new count are removed only after the new
//!    envelope is in place.
//!
//! Deletion runs the other way: the envelope goes first, then its chunks.
//!
//! A failure at any step leaves at worst orphaned chunk records that no
//! envelope references. Overwriting the key in place can briefly pair the
//! old envelope with new chunk data; the checksum turns that into
//! [`StorageError::Integrity`] rather than a wrong value. Callers hold the
//! key lock, so that window is only visible to other processes sharing the
//! backend.

use crate::backend::Backend;
use crate::error::StorageError;
use crate::item::{chunk_key, ItemError, StorageItem};

use super::options::{Chunk, ItemOptions};

/// Write `item`, splitting its payload into chunk records above `chunk_size`
///
/// Returns the number of chunk records written.
pub(crate) async fn write_envelope(
    backend: &dyn Backend,
    mut item: StorageItem,
    chunk_size: usize,
    options: Option<&ItemOptions>,
) -> Result<u32, StorageError> {
    let total = item.value.len();

    if total > chunk_size {
        let payload = std::mem::take(&mut item.value);
        let count = u32::try_from(payload.len().div_ceil(chunk_size)).map_err(|_| {
            StorageError::Validation(format!("payload of {total} bytes needs too many chunks"))
        })?;

        let mut written = 0;
        for (index, data) in payload.chunks(chunk_size).enumerate() {
            let index = index as u32;
            backend.set(&chunk_key(&item.key, index), data).await?;
            written += data.len();

            if let Some(options) = options {
                if let Some(handler) = &options.chunk_handler {
                    let chunk = Chunk {
                        key: &item.key,
                        index,
                        total: count,
                        data,
                    };
                    handler(&chunk).map_err(|e| {
                        StorageError::Validation(format!(
                            "chunk handler rejected chunk {index} of {}: {e}",
                            item.key
                        ))
                    })?;
                }
                options.report(written, total);
            }
        }
        item.chunks = count;
    } else if let Some(options) = options {
        options.report(total, total);
    }

    let bytes = item.to_bytes().map_err(|e| e.for_key(&item.key))?;
    backend.set(&item.key, &bytes).await?;
    Ok(item.chunks)
}

/// Read the envelope under `key` without reassembling chunks
pub(crate) async fn peek_envelope(
    backend: &dyn Backend,
    key: &str,
) -> Result<Option<StorageItem>, StorageError> {
    let Some(bytes) = backend.get(key).await? else {
        return Ok(None);
    };
    let item = StorageItem::from_bytes(&bytes).map_err(|e| e.for_key(key))?;
    if item.key != key {
        return Err(StorageError::integrity(
            key,
            format!("envelope belongs to {}", item.key),
        ));
    }
    Ok(Some(item))
}

/// Read the envelope under `key` with its full payload in `value`
pub(crate) async fn read_envelope(
    backend: &dyn Backend,
    key: &str,
) -> Result<Option<StorageItem>, StorageError> {
    let Some(mut item) = peek_envelope(backend, key).await? else {
        return Ok(None);
    };

    if item.is_chunked() {
        let mut payload = Vec::new();
        for index in 0..item.chunks {
            let data = backend.get(&chunk_key(key, index)).await?.ok_or_else(|| {
                ItemError::MissingChunk {
                    index,
                    total: item.chunks,
                }
                .for_key(key)
            })?;
            payload.extend_from_slice(&data);
        }
        item.value = payload;
    }
    Ok(Some(item))
}

/// Chunk records referenced by the envelope currently under `key`
///
/// An unreadable envelope counts as unchunked.
pub(crate) async fn stored_chunk_count(backend: &dyn Backend, key: &str) -> Result<u32, StorageError> {
    Ok(match backend.get(key).await? {
        Some(bytes) => StorageItem::from_bytes(&bytes).map(|item| item.chunks).unwrap_or(0),
        None => 0,
    })
}

/// Remove chunk records `from..to` of `key`
pub(crate) async fn remove_chunks(
    backend: &dyn Backend,
    key: &str,
    from: u32,
    to: u32,
) -> Result<(), StorageError> {
    for index in from..to {
        backend.remove(&chunk_key(key, index)).await?;
    }
    Ok(())
}

/// Remove the envelope under `key`, then its chunk records
pub(crate) async fn delete_envelope(backend: &dyn Backend, key: &str) -> Result<(), StorageError> {
    let chunks = stored_chunk_count(backend, key).await?;
    backend.remove(key).await?;
    remove_chunks(backend, key, 0, chunks).await
}

/// Write `item` over whatever `key` held, dropping chunk records it no longer uses
pub(crate) async fn replace_envelope(
    backend: &dyn Backend,
    item: StorageItem,
    chunk_size: usize,
    options: Option<&ItemOptions>,
) -> Result<(), StorageError> {
    let key = item.key.clone();
    let previous = stored_chunk_count(backend, &key).await?;
    let written = write_envelope(backend, item, chunk_size, options).await?;
    if previous > written {
        remove_chunks(backend, &key, written, previous).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::item::ItemCodec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn item(key: &str, payload: &[u8]) -> StorageItem {
        ItemCodec::new(None).encode(key, payload, false, false).unwrap()
    }

    #[tokio::test]
    async fn test_chunked_write_and_read() {
        let backend = MemoryBackend::new();
        let original = item("big", &[9u8; 100]);
        let stored_len = original.value.len();

        let chunks = write_envelope(&backend, original.clone(), 64, None).await.unwrap();
        assert_eq!(chunks as usize, stored_len.div_ceil(64));
        assert!(backend.contains(&chunk_key("big", 0)).await.unwrap());

        let read = read_envelope(&backend, "big").await.unwrap().unwrap();
        assert_eq!(read.value, original.value);
        read.verify().unwrap();
    }

    #[tokio::test]
    async fn test_missing_chunk_is_integrity_error() {
        let backend = MemoryBackend::new();
        write_envelope(&backend, item("big", &[1u8; 100]), 32, None).await.unwrap();
        backend.remove(&chunk_key("big", 1)).await.unwrap();

        assert!(matches!(
            read_envelope(&backend, "big").await,
            Err(StorageError::Integrity { .. })
        ));
    }

    #[tokio::test]
    async fn test_replace_drops_stale_chunks() {
        let backend = MemoryBackend::new();
        replace_envelope(&backend, item("k", &[1u8; 200]), 32, None).await.unwrap();
        let before = backend.len().await.unwrap();
        assert!(before > 2);

        replace_envelope(&backend, item("k", b"tiny"), 32, None).await.unwrap();
        assert_eq!(backend.keys().await.unwrap(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_error_leaves_no_envelope() {
        let backend = MemoryBackend::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let options = {
            let seen = Arc::clone(&seen);
            ItemOptions::new().on_chunk(move |chunk| {
                seen.fetch_add(1, Ordering::SeqCst);
                if chunk.index == 1 {
                    Err("quota exceeded".into())
                } else {
                    Ok(())
                }
            })
        };

        let result = write_envelope(&backend, item("k", &[1u8; 200]), 32, Some(&options)).await;
        assert!(matches!(result, Err(StorageError::Validation(_))));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(backend.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_chunks() {
        let backend = MemoryBackend::new();
        write_envelope(&backend, item("k", &[1u8; 200]), 32, None).await.unwrap();
        delete_envelope(&backend, "k").await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 0);
    }
}
