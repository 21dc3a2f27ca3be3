//! Config - typed option values
//!
//! - `option.rs` - `OptionValue`, the tagged union experiment options are decoded into

mod option;

pub use option::OptionValue;
