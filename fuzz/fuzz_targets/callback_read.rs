//! Fuzz target for callback-driven reads with arbitrary input and chunking.
//!
//! The first byte picks the chunk size handed out by the read callback; the
//! rest is the archive. Every compiled filter is enabled, so the input is
//! bid on, decoded and read through to the end.
//!
//! Run with: cargo +nightly fuzz run callback_read

#![no_main]

use std::io::Cursor;

use arcstream::{ReadArchive, ReadBuffer};
use libfuzzer_sys::fuzz_target;

struct Input {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

fuzz_target!(|data: &[u8]| {
    let Some((&first, rest)) = data.split_first() else {
        return;
    };
    let input = Input {
        data: rest.to_vec(),
        pos: 0,
        chunk: usize::from(first) + 1,
    };

    let mut archive: ReadArchive<Input> = ReadArchive::new();
    let _ = archive.support_filter_all();
    let _ = archive.support_format_all();
    let _ = archive.support_format_raw();
    let _ = archive.set_read_callback(|_, input: &mut Input| {
        let end = (input.pos + input.chunk).min(input.data.len());
        let chunk = input.data[input.pos..end].to_vec();
        input.pos = end;
        Ok((!chunk.is_empty()).then(|| Box::new(Cursor::new(chunk)) as ReadBuffer))
    });
    if archive.open(input).is_err() {
        return;
    }

    // We don't care about the result - we're looking for panics or hangs
    let mut sink = std::io::sink();
    while let Ok(Some(_)) = archive.next_header() {
        if archive.read_data_into(&mut sink).is_err() {
            break;
        }
    }
    let _ = archive.free();
});
