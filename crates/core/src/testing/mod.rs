//! Mock implementations of the platform and launcher seams.

mod mock_launcher;
mod mock_volumes;

pub use mock_launcher::{LaunchRecord, MockLauncher, MockPlotScript};
pub use mock_volumes::{MockSpaceProbe, MockVolumeSource};
