mod calibrate;
#[cfg(feature = "cdp")]
mod cdp;
mod cursors;
mod export;
mod post;
mod status;
mod util;

pub use calibrate::{feed_har, persist_capture, run_calibrate, CalibrateOptions, CalibrationReport};
#[cfg(feature = "cdp")]
pub use cdp::{run_cdp_calibration, CdpOptions};
pub use cursors::{run_cursors_export, run_cursors_import, CursorsOptions};
pub use export::{run_export, ExportOptions};
pub use post::{run_post, PostOptions};
pub use status::{run_status, StatusOptions};
