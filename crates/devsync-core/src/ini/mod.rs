//! INI-style settings format: the record model and its text codec.

pub mod codec;
pub mod record;

pub use codec::{check_key, check_section_name, parse, render, IniError};
pub use record::{ConfigRecord, Section};
