//! The built-in native modules.
//!
//! `Core` holds the pure-language helpers; `System` holds everything that
//! touches the host's I/O streams. Both expose their registration contract
//! as a list of signatures (for the parser) and `(name, value)` pairs (for
//! the VM's global table).

pub mod core;
pub mod system;

pub use self::core::{Core, CoreConfig};
pub use self::system::{System, SystemConfig};
