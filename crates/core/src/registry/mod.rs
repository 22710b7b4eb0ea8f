mod room;
mod user;

pub use room::RoomRegistry;
pub use user::UserRegistry;
