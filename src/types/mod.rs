mod cert;
mod origin;

pub use cert::*;
pub use origin::*;
