//! One handler per client-facing message method.

mod create_room;
mod create_room_notice;
mod group_message;
mod join_room;
mod normal_message;
mod offline;
mod room_list;
mod room_user_list;

pub use create_room::CreateRoomHandler;
pub use create_room_notice::CreateRoomNoticeHandler;
pub use group_message::GroupMessageHandler;
pub use join_room::JoinRoomHandler;
pub use normal_message::NormalMessageHandler;
pub use offline::OfflineHandler;
pub use room_list::RoomListHandler;
pub use room_user_list::RoomUserListHandler;

pub const ROOM_NAME_REQUIRED: &str = "room name must not be empty";
pub const ROOM_ALREADY_CREATED: &str = "you already created a room";
pub const CHOOSE_ROOM: &str = "choose a room first";
pub const ROOM_NOT_FOUND: &str = "room does not exist";
pub const NOT_IN_ROOM: &str = "you are not a member of this room";
pub const CHOOSE_RECIPIENT: &str = "choose a recipient";
pub const ONLY_GROUP_CHAT: &str = "only group chat is supported";
