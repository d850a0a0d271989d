//! Stream combinators used by snapshot subscribers.

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
