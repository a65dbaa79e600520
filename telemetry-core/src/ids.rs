//! Command id generation.
//!
//! Each queued command is stamped with a short random hex token so ACKs
//! can be matched back to their request. `rand` is already pulled in for
//! this purpose elsewhere in the workspace (discovery jitter), so it is
//! reused here rather than hand-rolling an RNG.

use rand::Rng;

/// A fresh, lowercase 8-hex-digit command id.
pub fn new_command_id() -> String {
    let value: u32 = rand::thread_rng().gen();
    format!("{value:08x}")
}
