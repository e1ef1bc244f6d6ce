pub mod bytes;
pub mod clock;
