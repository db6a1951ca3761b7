pub mod connection;
pub mod emails;
pub mod health;
pub mod login;
pub mod me;
pub mod messages;
pub mod otp;
