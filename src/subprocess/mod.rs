pub mod channel;
pub use channel::*;

pub mod cputime;
pub use cputime::*;

pub mod stop;
