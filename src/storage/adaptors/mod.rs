mod file;
mod mem;
mod sled;

pub use self::file::*;
pub use self::mem::*;
pub use self::sled::*;
