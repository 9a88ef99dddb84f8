pub mod frame;
pub mod primitive;
pub mod reply;

pub use frame::{Arg, write_frame};
pub use reply::{Reply, ReplyShape};
