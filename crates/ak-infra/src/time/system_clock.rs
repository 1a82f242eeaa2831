use std::time::{SystemTime, UNIX_EPOCH};

use ak_core::ports::ClockPort;

/// Wall clock for production wiring: unix epoch milliseconds, the unit all
/// retry records and backoff windows are expressed in.
pub struct SystemClock;

impl ClockPort for SystemClock {
    fn now_ms(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as i64,
            // A pre-epoch clock means a badly misconfigured host; zero
            // makes every pending backoff window count as elapsed.
            Err(_) => 0,
        }
    }
}
