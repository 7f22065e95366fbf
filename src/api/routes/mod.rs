pub mod entities;
pub mod health;
pub mod monitors;
