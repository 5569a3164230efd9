//! Re-chunking of arbitrary byte streams into fixed-size upload parts

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use std::io;

struct RechunkState<S> {
    input: S,
    buffer: BytesMut,
    finished: bool,
}

/// Regroup `input` into parts of exactly `part_size` bytes.
///
/// Every emitted part is `part_size` long except the last, which carries the
/// remainder and may be smaller. An empty input emits nothing. An input
/// error is forwarded once and ends the stream; buffered bytes are dropped.
/// The input is polled only when the buffer cannot fill the next part, so
/// a slow consumer holds back the producer.
pub fn rechunk<S>(input: S, part_size: usize) -> impl Stream<Item = io::Result<Bytes>>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    let part_size = part_size.max(1);
    let state = RechunkState {
        input,
        buffer: BytesMut::with_capacity(part_size),
        finished: false,
    };

    stream::unfold(state, move |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            if state.buffer.len() >= part_size {
                let part = state.buffer.split_to(part_size).freeze();
                return Some((Ok(part), state));
            }

            match state.input.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.finished = true;
                    state.buffer.clear();
                    return Some((Err(e), state));
                }
                None => {
                    state.finished = true;
                    if state.buffer.is_empty() {
                        return None;
                    }
                    let part = state.buffer.split().freeze();
                    return Some((Ok(part), state));
                }
            }
        }
    })
}
