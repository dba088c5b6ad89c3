//! Domain types shared by the codec and the engine.
//!
//! - **`device`** – The bridge's hardware identifier and the device kind it
//!   advertises during discovery.
//! - **`ir_code`** – Names of stored infrared codes and the code itself.

pub mod device;
pub mod ir_code;
