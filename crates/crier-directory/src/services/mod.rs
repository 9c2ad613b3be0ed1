mod device_tokens;
mod resolver;
mod types;
mod users;

pub use device_tokens::DeviceTokenService;
pub use resolver::{AudienceResolver, DEFAULT_PAGE_SIZE};
pub use types::{AudienceDescriptor, ChannelReach, DirectoryError, ReachEstimate};
pub use users::UserService;
