//! Native functions exposed to every program.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::heap::object::Native;
use crate::heap::value::Value;

/// Installed into globals when a `Vm` is created.
pub const NATIVES: &[Native] = &[Native {
    name: "clock",
    arity: 0,
    function: clock,
}];

/// Seconds since the Unix epoch, as a double.
fn clock(_args: &[Value]) -> Result<Value, String> {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => Ok(Value::Number(elapsed.as_secs_f64())),
        Err(_) => Err("System clock is before the Unix epoch.".to_owned()),
    }
}
