pub mod orders;
pub mod points;
pub mod products;
pub mod repository;
pub mod users;

pub use orders::Orders;
pub use points::Points;
pub use products::Products;
pub use repository::Repository;
pub use users::Users;
