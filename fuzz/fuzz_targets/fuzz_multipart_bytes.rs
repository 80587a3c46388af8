#![no_main]

use std::convert::Infallible;

use futures_util::stream::iter;
use libfuzzer_sys::fuzz_target;
use multer_spool::bytes::Bytes;
use multer_spool::{Limits, Multipart};
use tokio::runtime;

fuzz_target!(|data: &[u8]| {
    // First byte picks the chunk size so splits land everywhere.
    let (size, body) = match data.split_first() {
        Some((size, body)) => (usize::from(*size).max(1), body),
        None => return,
    };

    let chunks: Vec<_> = body
        .chunks(size)
        .map(|chunk| Result::<Bytes, Infallible>::Ok(Bytes::copy_from_slice(chunk)))
        .collect();

    let dir = std::env::temp_dir().join("multer-spool-fuzz");
    std::fs::create_dir_all(&dir).expect("fuzz tmp dir");

    let limits = Limits::new()
        .tmp_dir(&dir)
        .max_file_size(64 * 1024)
        .max_field_size(4 * 1024)
        .max_parts(16);

    let rt = runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
    rt.block_on(async {
        let multipart = Multipart::new(iter(chunks), "X-BOUNDARY", limits).expect("valid boundary");
        drop(multipart.parse().await);
    });
});
