//! Volume discovery and destination selection.

mod provider;
mod source;
mod types;

pub use provider::{
    DestinationProvider, DEST_DIR_NAME, FREE_SPACE_THRESHOLD, NO_WRITE_FILE,
};
pub use source::{SpaceProbe, SysinfoSpaceProbe, SysinfoVolumeSource, VolumeSource};
pub use types::{DestinationVolume, MountedVolume, VolumeSpace};
