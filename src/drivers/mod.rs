pub mod filter;
pub mod gps;
pub mod modem;

#[cfg(feature = "firmware")]
pub mod flash;
