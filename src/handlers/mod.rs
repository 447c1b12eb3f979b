// src/handlers/mod.rs

pub mod submissions;
