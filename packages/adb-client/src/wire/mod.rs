//! Wire-level framing for the two protocols multiplexed over a single adb
//! connection: the textual host protocol and the binary sync protocol.

pub mod host;
pub mod sync;
pub(crate) mod util;
