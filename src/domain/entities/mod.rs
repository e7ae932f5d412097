//! Domain entity definitions.

mod caller;
mod resource;
mod storage_mode;

pub use caller::CallerHandle;
pub use resource::{
    ImageSource, LoadedImage, ResourceId, ResourceModel, ResourcePriority, ResourceState,
    ResourceUrl,
};
pub use storage_mode::StorageMode;
