//! Reassembly of fragmented inbound bytes into logical text frames.
//!
//! The device writes in bursts with no framing of its own, so a frame is
//! "whatever arrived until the line went quiet": accumulation ends after a
//! fixed run of idle polls, or at a hard cap counted from the first byte so
//! a steady trickle cannot hold a frame open forever.

use std::time::Instant;

use crate::encoding::decode_text;
use crate::link::Timing;
use crate::transport::Transport;
use crate::Result;

/// Accumulate one frame from `transport`. `None` when nothing arrived or
/// the bytes normalized away to an empty string.
pub(crate) fn collect_frame(
    transport: &mut dyn Transport,
    timing: &Timing,
) -> Result<Option<String>> {
    let mut raw = Vec::new();
    let mut idle_polls = 0u32;
    let started = Instant::now();

    loop {
        if started.elapsed() >= timing.reassembly_cap {
            break;
        }

        let available = transport.available()?;
        if available > 0 {
            let mut chunk = vec![0u8; available];
            let n = transport.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
            idle_polls = 0;
        } else {
            idle_polls += 1;
            if idle_polls >= timing.max_idle_polls {
                break;
            }
        }

        std::thread::sleep(timing.idle_poll);
    }

    if raw.is_empty() {
        return Ok(None);
    }

    let text = normalize(&decode_text(&raw));
    Ok(if text.is_empty() { None } else { Some(text) })
}

/// Collapse a raw frame into a single display line: carriage returns are
/// dropped, newlines become spaces, whitespace runs become one space.
pub fn normalize(text: &str) -> String {
    let stripped = text.replace('\r', "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
