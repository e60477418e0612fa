//! Data movement between memory and storage.
//!
//! - [`disk_io`]: async file I/O and index persistence for the cold tier

pub mod disk_io;
