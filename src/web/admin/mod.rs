mod auth;
mod users;

pub use auth::require_admin_user;
pub use users::{process_user_management, user_management_page};
