pub mod guestview;

pub use guestview::*;
