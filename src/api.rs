pub mod dead_letter;
pub mod health;
pub mod queue;
pub mod send;
