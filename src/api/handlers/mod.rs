pub mod codes;
pub mod health;
pub mod root;
