#[path = "0-bio/mod.rs"]
pub mod bio;
#[path = "0-crypto/mod.rs"]
pub mod crypto;
#[path = "1-merkle/mod.rs"]
pub mod merkle;
#[path = "2-pchip/mod.rs"]
pub mod pchip;
#[path = "3-schip/mod.rs"]
pub mod schip;
#[path = "4-server/mod.rs"]
pub mod server;
