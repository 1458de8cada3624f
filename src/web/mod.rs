pub mod admin;
pub mod archives;
pub mod auth;
pub mod data;
pub mod flash;
pub mod landing;
pub mod models;
pub mod responses;
pub mod router;
pub mod settings;
pub mod share;
pub mod state;
pub mod storage;
pub mod templates;
pub mod uploads;
pub mod works;

#[cfg(test)]
mod tests;

pub use auth::AuthUser;
pub use state::AppState;
pub use templates::{escape_html, render_login_page, render_register_page};
