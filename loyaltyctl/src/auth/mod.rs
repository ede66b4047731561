pub mod current_user;
pub mod permissions;
