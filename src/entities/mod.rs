pub mod grant;
pub mod user;

pub use grant::Entity as Grant;
pub use user::Entity as User;
