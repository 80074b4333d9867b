pub mod handlers;
pub mod services;
pub mod upload;

pub use handlers::router;
pub use upload::{FormInput, UploadedFile};
