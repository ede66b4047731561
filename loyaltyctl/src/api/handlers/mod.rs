pub mod orders;
pub mod points;
pub mod products;
pub mod users;
