pub mod auth;
pub mod rest;
pub mod wire;
