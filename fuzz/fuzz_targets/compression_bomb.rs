#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stashkit_core::compression::{self, MAX_COMPRESSION_RATIO, MAX_UNCOMPRESSED_SIZE};
use stashkit_core::{integrity, ItemCodec, StorageItem};

#[derive(Arbitrary, Debug)]
struct CompressionBombTestCase {
    /// Block length (tiny blocks create extreme ratios)
    block_size: u16,
    /// Claimed original size written into the frame header
    original_size: u32,
    /// Byte the block is filled with
    data_pattern: u8,
    /// Store the frame inside a checksummed envelope as well
    wrap_in_item: bool,
}

fuzz_target!(|case: CompressionBombTestCase| {
    // Attack scenarios:
    // 1. Decompression bomb: tiny block claiming a huge original size
    // 2. Size limit bypass: claims above MAX_UNCOMPRESSED_SIZE
    // 3. Malformed LZ4 block
    // 4. u32::MAX original size

    let block = vec![case.data_pattern; case.block_size as usize];
    let mut frame = case.original_size.to_be_bytes().to_vec();
    frame.extend_from_slice(&block);

    // Property 1: decompression never panics
    let result = compression::decompress(&frame);

    // Property 2: output never exceeds the size limit
    if let Ok(decompressed) = &result {
        assert!(decompressed.len() <= MAX_UNCOMPRESSED_SIZE);
        assert_eq!(decompressed.len(), case.original_size as usize);
    }

    // Property 3: claims beyond the ratio limit are always refused
    let limit = MAX_COMPRESSION_RATIO * block.len() as u64;
    if block.is_empty() || case.original_size as u64 > limit {
        assert!(result.is_err(), "bomb frame accepted: {} -> {}", block.len(), case.original_size);
    }

    // Property 4: the envelope path applies the same limits
    if case.wrap_in_item {
        let item = StorageItem {
            key: "fuzz".into(),
            checksum: integrity::checksum(&frame),
            value: frame,
            timestamp: 0,
            version: 1,
            encrypted: false,
            compressed: true,
            metadata: Default::default(),
            expires_at: None,
            chunks: 0,
        };
        let decoded = ItemCodec::new(None).decode::<serde_json::Value>(&item);
        if result.is_err() {
            assert!(decoded.is_err());
        }
    }
});
