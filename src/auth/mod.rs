pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod policy;
pub mod services;
pub mod tokens;

pub use extractors::{CurrentUser, MaybeUser};
pub use policy::{Policy, Resource, ADMIN_ONLY};
