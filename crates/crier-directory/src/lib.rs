//! User directory, profiles, device tokens, and audience resolution.

mod handlers;
pub mod plugin;
pub mod services;

pub use handlers::{configure_routes, DirectoryApiDoc, DirectoryState};
pub use plugin::DirectoryPlugin;
pub use services::{
    AudienceDescriptor, AudienceResolver, ChannelReach, DeviceTokenService, DirectoryError,
    ReachEstimate, UserService, DEFAULT_PAGE_SIZE,
};
