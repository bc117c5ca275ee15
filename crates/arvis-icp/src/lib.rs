#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod alignment;
pub use alignment::*;

mod correspondence;
pub use correspondence::*;

mod registration;
pub use registration::*;
