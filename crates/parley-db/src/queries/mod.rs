pub mod contacts;
pub mod conversations;
pub mod messages;
pub mod users;
