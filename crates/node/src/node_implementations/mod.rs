pub mod anvil;
pub mod katana;
