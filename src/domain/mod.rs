pub mod health;
pub mod receiver;
